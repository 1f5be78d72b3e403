//! Playback configuration
//!
//! Binaries, timeouts, and control steps used by the resolver, sessions,
//! and the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use serde::{ Deserialize, Serialize };


/// Tunables for the external player, the extractor, and the run loop.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct PlayerConfig {
    /// External audio player binary.
    pub player_bin: PathBuf,

    /// Extra arguments placed before the per-track player arguments.
    pub player_extra_args: Vec<String>,

    /// External stream extractor binary.
    pub extractor_bin: PathBuf,

    /// Directory for per-session IPC sockets (ignored on Windows).
    pub ipc_dir: Option<PathBuf>,

    /// Timeout for a single extraction strategy, in seconds.
    pub resolve_timeout_secs: u64,

    /// How many times to try connecting to the control channel.
    pub connect_attempts: u32,

    /// Delay between control channel connection attempts, in milliseconds.
    pub connect_backoff_ms: u64,

    /// Pause after an unplayable track before moving on, in milliseconds.
    pub skip_delay_ms: u64,

    /// Pause between sessions, in milliseconds.
    pub inter_track_delay_ms: u64,

    /// Seconds jumped by one seek keypress.
    pub seek_step_secs: u32,

    /// Percent changed by one volume keypress.
    pub volume_step: u8,

    /// Volume applied to the first session of a run.
    pub default_volume: u8,
}


impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            player_bin: PathBuf::from( "mpv" ),
            player_extra_args: Vec::new(),
            extractor_bin: PathBuf::from( "yt-dlp" ),
            ipc_dir: None,
            resolve_timeout_secs: 20,
            connect_attempts: 20,
            connect_backoff_ms: 150,
            skip_delay_ms: 1500,
            inter_track_delay_ms: 500,
            seek_step_secs: 10,
            volume_step: 5,
            default_volume: 100,
        }
    }
}


impl PlayerConfig {
    pub fn resolve_timeout( &self ) -> Duration {
        Duration::from_secs( self.resolve_timeout_secs )
    }


    pub fn connect_backoff( &self ) -> Duration {
        Duration::from_millis( self.connect_backoff_ms )
    }


    pub fn skip_delay( &self ) -> Duration {
        Duration::from_millis( self.skip_delay_ms )
    }


    pub fn inter_track_delay( &self ) -> Duration {
        Duration::from_millis( self.inter_track_delay_ms )
    }


    /// Directory where IPC sockets are created.
    ///
    /// Falls back to the runtime dir, then the system temp dir.
    pub fn socket_dir( &self ) -> PathBuf {
        self.ipc_dir
            .clone()
            .or_else( dirs::runtime_dir )
            .unwrap_or_else( std::env::temp_dir )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PlayerConfig = serde_json::from_str( r#"{ "player_bin": "/opt/mpv", "volume_step": 10 }"# ).unwrap();
        assert_eq!( config.player_bin, PathBuf::from( "/opt/mpv" ) );
        assert_eq!( config.volume_step, 10 );
        assert_eq!( config.extractor_bin, PathBuf::from( "yt-dlp" ) );
        assert_eq!( config.default_volume, 100 );
    }


    #[test]
    fn test_explicit_ipc_dir_wins() {
        let config = PlayerConfig { ipc_dir: Some( PathBuf::from( "/tmp/deck" ) ), ..Default::default() };
        assert_eq!( config.socket_dir(), PathBuf::from( "/tmp/deck" ) );
    }
}
