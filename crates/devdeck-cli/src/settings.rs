//! Application settings management
//!
//! Handles persistent settings: the player configuration and a few shell
//! preferences, stored as JSON in the user's config directory.

use std::fs;
use std::io;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };

use devdeck_core::{ LoopMode, PlayerConfig };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// External player, extractor, and playback tunables
    pub player: PlayerConfig,

    /// Number of results requested per search
    pub search_limit: usize,

    /// Loop mode applied at startup
    pub loop_mode: LoopMode,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            search_limit: 10,
            loop_mode: LoopMode::None,
        }
    }
}


impl Settings {
    /// Returns the default path to the settings file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "devdeck" ).join( "settings.json" ) )
    }


    /// Loads settings from `path`, or returns defaults if missing or invalid.
    pub fn load( path: Option<&Path> ) -> Self {
        let path = match path.map( Path::to_path_buf ).or_else( Self::default_path ) {
            Some( p ) => p,
            None => return Self::default(),
        };

        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( &path ) {
            Ok( contents ) => {
                serde_json::from_str( &contents ).unwrap_or_else( |e| {
                    tracing::warn!( "Invalid settings in {:?}: {}", path, e );
                    Self::default()
                })
            }
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Writes settings to `path`, creating its directory.
    pub fn save( &self, path: &Path ) -> io::Result<()> {
        if let Some( parent ) = path.parent() {
            fs::create_dir_all( parent )?;
        }
        let json = serde_json::to_string_pretty( self ).map_err( io::Error::other )?;
        fs::write( path, json )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load( Some( &dir.path().join( "nope.json" ) ) );
        assert_eq!( settings, Settings::default() );
    }


    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );

        let mut settings = Settings::default();
        settings.search_limit = 3;
        settings.loop_mode = LoopMode::One;
        settings.player.default_volume = 70;
        settings.save( &path ).unwrap();

        assert_eq!( Settings::load( Some( &path ) ), settings );
    }


    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "{ not json" ).unwrap();
        assert_eq!( Settings::load( Some( &path ) ), Settings::default() );
    }
}
