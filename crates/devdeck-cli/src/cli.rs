//! Command-line argument parsing for DevDeck.

use std::path::PathBuf;

use clap::Parser;

use devdeck_core::LoopMode;


/// DevDeck - A terminal command center with a media queue.
#[derive( Parser, Debug )]
#[command( name = "devdeck" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Settings file to use instead of the default location.
    #[arg( short, long )]
    pub settings: Option<PathBuf>,

    /// Loop mode for the initial queue (none, all, one).
    #[arg( short, long = "loop" )]
    pub loop_mode: Option<LoopMode>,

    /// Play the initial queue in the background instead of the foreground.
    #[arg( short, long )]
    pub background: bool,

    /// Track ids or URLs to queue on startup.
    #[arg( trailing_var_arg = true )]
    pub tracks: Vec<String>,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_flags_and_tracks() {
        let args = Args::parse_from([ "devdeck", "--loop", "all", "-b", "abc123", "https://youtu.be/x" ]);
        assert_eq!( args.loop_mode, Some( LoopMode::All ) );
        assert!( args.background );
        assert_eq!( args.tracks, vec![ "abc123", "https://youtu.be/x" ] );
        assert!( args.settings.is_none() );
    }


    #[test]
    fn test_rejects_unknown_loop_mode() {
        assert!( Args::try_parse_from([ "devdeck", "--loop", "sometimes" ]).is_err() );
    }
}
