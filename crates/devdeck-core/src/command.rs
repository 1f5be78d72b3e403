//! Shell command parsing.
//!
//! Provides the command vocabulary for the interactive shell. Commands are
//! parsed from a line of user input; executing them is left to the shell.

use thiserror::Error;

use crate::queue::LoopMode;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed shell command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Discovery commands
    Search { query: String },
    Artist { name: String },
    Pick { choices: Vec<usize> },

    // Queue commands
    Add { id: String },
    Remove { position: usize },
    Clear,
    Queue,
    Loop { mode: Option<LoopMode> },

    // Playback commands
    Play,
    Background,
    Stop,
    Status,

    // Playlist commands
    Save { name: String },
    Load { name: String, append: bool },
    Playlists,
    Delete { name: String },
    Import { url: String, name: String },

    Help,
    Quit,
}


/// Parses 1-based positions like "1 3 4" or "2,5".
fn parse_positions( s: &str ) -> Result<Vec<usize>, CommandError> {
    s.split( |c: char| c == ',' || c.is_whitespace() )
        .filter( |part| !part.is_empty() )
        .map( |part| match part.parse::<usize>() {
            Ok( n ) if n > 0 => Ok( n ),
            _ => Err( CommandError::InvalidArgument( format!( "Invalid position: '{}'", part ) ) ),
        })
        .collect()
}


impl Command {
    /// Parses a command line.
    ///
    /// @param input - The command line to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        let required = |what: &str| {
            args.map( str::to_string )
                .ok_or_else( || CommandError::MissingArgument( what.into() ) )
        };

        match cmd.as_str() {
            // Discovery commands
            "search" | "s" | "find" => Ok( Command::Search { query: required( "search term" )? } ),
            "artist" | "ar" => Ok( Command::Artist { name: required( "artist name" )? } ),
            "pick" | "pk" => {
                let choices = parse_positions( &required( "result number" )? )?;
                Ok( Command::Pick { choices } )
            }

            // Queue commands
            "add" | "a" => Ok( Command::Add { id: required( "track id or url" )? } ),
            "remove" | "rm" | "del" => {
                let arg = required( "queue position" )?;
                let position = match arg.parse::<usize>() {
                    Ok( n ) if n > 0 => n,
                    _ => return Err( CommandError::InvalidArgument( format!( "Invalid position: '{}'", arg ) ) ),
                };
                Ok( Command::Remove { position } )
            }
            "clear" | "cl" => Ok( Command::Clear ),
            "queue" | "ls" | "list" => Ok( Command::Queue ),
            "loop" | "repeat" | "rep" => {
                let mode = args
                    .map( |s| s.parse::<LoopMode>() )
                    .transpose()
                    .map_err( |e| CommandError::InvalidArgument( e.to_string() ) )?;
                Ok( Command::Loop { mode } )
            }

            // Playback commands
            "play" | "p" => Ok( Command::Play ),
            "bg" | "background" => Ok( Command::Background ),
            "stop" | "st" => Ok( Command::Stop ),
            "status" | "now" => Ok( Command::Status ),

            // Playlist commands
            "save" => Ok( Command::Save { name: required( "playlist name" )? } ),
            "load" => {
                let arg = required( "playlist name" )?;
                let ( name, append ) = match arg.rsplit_once( ' ' ) {
                    Some(( name, flag )) if flag.eq_ignore_ascii_case( "append" ) => ( name.trim().to_string(), true ),
                    _ => ( arg, false ),
                };
                Ok( Command::Load { name, append } )
            }
            "playlists" | "pls" => Ok( Command::Playlists ),
            "delete" | "drop" => Ok( Command::Delete { name: required( "playlist name" )? } ),
            "import" => {
                let arg = required( "playlist url" )?;
                let ( url, name ) = arg.split_once( ' ' )
                    .map( |( url, name )| ( url.to_string(), name.trim().to_string() ) )
                    .ok_or_else( || CommandError::MissingArgument( "playlist name".into() ) )?;
                Ok( Command::Import { url, name } )
            }

            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Discovery:
  search <query>        Search for tracks
  artist <name>         Search for an artist's tracks
  pick <n...>           Queue results from the last search

Queue:
  add <id|url>          Queue a track
  remove <n>            Remove queue entry n
  clear                 Clear the queue
  queue                 Show the queue
  loop [none|all|one]   Set loop mode (no argument cycles)

Playback:
  play                  Play in the foreground
  bg                    Play in the background
  stop                  Stop background playback
  status                Show what is playing

Playlists:
  save <name>           Save the queue
  load <name> [append]  Load a playlist (replaces the queue unless append)
  playlists             List saved playlists
  delete <name>         Delete a playlist
  import <url> <name>   Import a remote playlist

Keys while playing:
  space pause   <-/-> seek   up/down volume   q/n skip   esc/ctrl+c stop

  help                  Show this help
  quit                  Exit devdeck"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_search() {
        let cmd = Command::parse( "search  lofi beats " ).unwrap();
        assert_eq!( cmd, Command::Search { query: "lofi beats".into() } );
    }


    #[test]
    fn test_parse_pick_positions() {
        let cmd = Command::parse( "pick 1 3,4" ).unwrap();
        assert_eq!( cmd, Command::Pick { choices: vec![ 1, 3, 4 ] } );
        assert!( matches!( Command::parse( "pick 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_remove_is_one_based() {
        assert_eq!( Command::parse( "rm 2" ).unwrap(), Command::Remove { position: 2 } );
        assert!( matches!( Command::parse( "remove zero" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_loop_with_mode() {
        let cmd = Command::parse( "loop all" ).unwrap();
        assert_eq!( cmd, Command::Loop { mode: Some( LoopMode::All ) } );
    }


    #[test]
    fn test_parse_loop_toggle() {
        let cmd = Command::parse( "loop" ).unwrap();
        assert_eq!( cmd, Command::Loop { mode: None } );
        assert!( matches!( Command::parse( "loop twice" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_load_append() {
        assert_eq!(
            Command::parse( "load road trip append" ).unwrap(),
            Command::Load { name: "road trip".into(), append: true }
        );
        assert_eq!(
            Command::parse( "load road trip" ).unwrap(),
            Command::Load { name: "road trip".into(), append: false }
        );
    }


    #[test]
    fn test_parse_import() {
        assert_eq!(
            Command::parse( "import https://list focus mix" ).unwrap(),
            Command::Import { url: "https://list".into(), name: "focus mix".into() }
        );
        assert!( matches!( Command::parse( "import https://list" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "add" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
