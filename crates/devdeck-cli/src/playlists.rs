//! Named playlist storage
//!
//! All playlists live in one JSON file mapping a name to its tracks.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use devdeck_core::Track;


/// Errors that can occur with playlist operations.
#[derive( Debug, Error )]
pub enum PlaylistError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Invalid playlist file: {0}" )]
    InvalidFormat( #[from] serde_json::Error ),

    #[error( "No playlist named '{0}'" )]
    NotFound( String ),

    #[error( "Playlist name is empty" )]
    EmptyName,
}


/// Strips characters that are awkward in names and file systems.
pub fn sanitize_name( name: &str ) -> String {
    name.chars()
        .filter( |c| !matches!( c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' ) )
        .collect::<String>()
        .trim()
        .to_string()
}


/// Playlist store backed by a JSON file.
#[derive( Debug, Clone )]
pub struct PlaylistStore {
    path: PathBuf,
}


impl PlaylistStore {
    pub fn new( path: impl Into<PathBuf> ) -> Self {
        Self { path: path.into() }
    }


    /// Store in the user's data directory.
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map( |d| Self::new( d.join( "devdeck" ).join( "playlists.json" ) ) )
    }


    fn read( &self ) -> Result<BTreeMap<String, Vec<Track>>, PlaylistError> {
        if !self.path.exists() {
            return Ok( BTreeMap::new() );
        }
        let contents = fs::read_to_string( &self.path )?;
        if contents.trim().is_empty() {
            return Ok( BTreeMap::new() );
        }
        Ok( serde_json::from_str( &contents )? )
    }


    fn write( &self, playlists: &BTreeMap<String, Vec<Track>> ) -> Result<(), PlaylistError> {
        if let Some( parent ) = self.path.parent() {
            fs::create_dir_all( parent )?;
        }
        fs::write( &self.path, serde_json::to_string_pretty( playlists )? )?;
        Ok(())
    }


    /// Lists playlist names with their track counts.
    pub fn list( &self ) -> Result<Vec<( String, usize )>, PlaylistError> {
        Ok( self.read()?
            .into_iter()
            .map( |( name, tracks )| ( name, tracks.len() ) )
            .collect() )
    }


    /// Saves `tracks` under `name`, replacing any playlist of that name.
    ///
    /// Returns the sanitized name actually used.
    pub fn save( &self, name: &str, tracks: &[Track] ) -> Result<String, PlaylistError> {
        let name = sanitize_name( name );
        if name.is_empty() {
            return Err( PlaylistError::EmptyName );
        }

        let mut playlists = self.read()?;
        playlists.insert( name.clone(), tracks.to_vec() );
        self.write( &playlists )?;
        tracing::info!( "Saved playlist '{}' ({} tracks)", name, tracks.len() );
        Ok( name )
    }


    pub fn load( &self, name: &str ) -> Result<Vec<Track>, PlaylistError> {
        let name = sanitize_name( name );
        self.read()?
            .remove( &name )
            .ok_or( PlaylistError::NotFound( name ) )
    }


    pub fn delete( &self, name: &str ) -> Result<(), PlaylistError> {
        let name = sanitize_name( name );
        let mut playlists = self.read()?;
        if playlists.remove( &name ).is_none() {
            return Err( PlaylistError::NotFound( name ) );
        }
        self.write( &playlists )?;
        tracing::info!( "Deleted playlist '{}'", name );
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn store() -> ( tempfile::TempDir, PlaylistStore ) {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::new( dir.path().join( "devdeck" ).join( "playlists.json" ) );
        ( dir, store )
    }


    #[test]
    fn test_sanitize_name() {
        assert_eq!( sanitize_name( r#" a/b\c:d*e?f"g<h>i|j "# ), "abcdefghij" );
        assert_eq!( sanitize_name( "Road Trip" ), "Road Trip" );
    }


    #[test]
    fn test_empty_store_lists_nothing() {
        let ( _dir, store ) = store();
        assert!( store.list().unwrap().is_empty() );
        assert!( matches!( store.load( "x" ), Err( PlaylistError::NotFound( _ ) ) ) );
    }


    #[test]
    fn test_save_load_delete() {
        let ( _dir, store ) = store();
        let tracks = vec![
            Track::new( "a", "One", "Band", 100 ),
            Track::new( "b", "Two", "Band", 0 ),
        ];

        assert_eq!( store.save( "focus/mix", &tracks ).unwrap(), "focusmix" );
        store.save( "other", &tracks[ ..1 ] ).unwrap();

        assert_eq!( store.list().unwrap(), vec![ ( "focusmix".to_string(), 2 ), ( "other".to_string(), 1 ) ] );
        assert_eq!( store.load( "focusmix" ).unwrap(), tracks );

        store.delete( "other" ).unwrap();
        assert!( matches!( store.delete( "other" ), Err( PlaylistError::NotFound( _ ) ) ) );
        assert_eq!( store.list().unwrap().len(), 1 );
    }


    #[test]
    fn test_save_overwrites() {
        let ( _dir, store ) = store();
        store.save( "mix", &[ Track::new( "a", "One", "Band", 1 ) ] ).unwrap();
        store.save( "mix", &[] ).unwrap();
        assert!( store.load( "mix" ).unwrap().is_empty() );
    }


    #[test]
    fn test_blank_name_rejected() {
        let ( _dir, store ) = store();
        assert!( matches!( store.save( "///", &[] ), Err( PlaylistError::EmptyName ) ) );
    }
}
