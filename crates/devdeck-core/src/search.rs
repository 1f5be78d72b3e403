//! Extractor-backed search and playlist import
//!
//! Both run the extractor in flat JSON mode and read one object per line.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::queue::Track;


/// Shortest track kept in search results, in seconds.
pub const MIN_DURATION_SECS: u64 = 10;

/// Longest track kept in search results, in seconds.
pub const MAX_DURATION_SECS: u64 = 900;


/// Errors that can occur while searching or importing.
#[derive( Debug, Error )]
pub enum SearchError {
    #[error( "Failed to run extractor {bin:?}: {source}" )]
    Spawn {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error( "Extractor timed out after {0}s" )]
    Timeout( u64 ),

    #[error( "Extractor failed: {0}" )]
    Extractor( String ),

    #[error( "Empty search query" )]
    EmptyQuery,
}


/// One flat entry as printed by the extractor.
#[derive( Debug, Deserialize )]
struct Entry {
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
}


impl Entry {
    fn duration_secs( &self ) -> u64 {
        self.duration
            .filter( |d| d.is_finite() && *d > 0.0 )
            .map( |d| d.round() as u64 )
            .unwrap_or( 0 )
    }


    fn into_track( self, default_author: &str ) -> Option<Track> {
        let duration = self.duration_secs();
        let id = self.id.filter( |id| !id.is_empty() )?;
        let author = self.uploader
            .or( self.channel )
            .unwrap_or_else( || default_author.to_string() );
        let title = self.title.unwrap_or_else( || id.clone() );
        Some( Track::new( id, title, author, duration ) )
    }
}


fn parse_entries( output: &str ) -> impl Iterator<Item = Entry> + '_ {
    output.lines()
        .map( str::trim )
        .filter( |line| !line.is_empty() )
        .filter_map( |line| match serde_json::from_str::<Entry>( line ) {
            Ok( entry ) => Some( entry ),
            Err( e ) => {
                tracing::debug!( "Skipping unparsable entry: {}", e );
                None
            }
        })
}


/// Parses search output, dropping clips and very long videos.
///
/// Entries with an unknown duration are kept.
pub fn parse_search_results( output: &str ) -> Vec<Track> {
    parse_entries( output )
        .filter_map( |entry| entry.into_track( "Unknown" ) )
        .filter( |track| {
            track.duration_secs == 0
                || ( MIN_DURATION_SECS..=MAX_DURATION_SECS ).contains( &track.duration_secs )
        })
        .collect()
}


/// Parses playlist output. Entries need both an id and a title.
pub fn parse_playlist( output: &str ) -> Vec<Track> {
    parse_entries( output )
        .filter( |entry| entry.title.as_deref().is_some_and( |t| !t.is_empty() ) )
        .filter_map( |entry| entry.into_track( "Playlist" ) )
        .collect()
}


/// The extractor query for a free-text or artist search.
pub fn search_query( query: &str, limit: usize, artist: bool ) -> String {
    let query = query.trim();
    if artist {
        format!( "ytsearch{}:{} official audio", limit, query )
    } else {
        format!( "ytsearch{}:{}", limit, query )
    }
}


/// Runs searches and imports through the extractor binary.
#[derive( Debug, Clone )]
pub struct Searcher {
    extractor: PathBuf,
    timeout: Duration,
}


impl Searcher {
    pub fn new( extractor: impl Into<PathBuf>, timeout: Duration ) -> Self {
        Self { extractor: extractor.into(), timeout }
    }


    /// Searches for up to `limit` tracks.
    pub async fn search( &self, query: &str, limit: usize, artist: bool ) -> Result<Vec<Track>, SearchError> {
        if query.trim().is_empty() {
            return Err( SearchError::EmptyQuery );
        }

        let target = search_query( query, limit, artist );
        tracing::info!( "Searching: {}", target );
        // Search exits non-zero when some entries fail; keep what it printed.
        let ( _, stdout ) = self.run( &target ).await?;
        let tracks = parse_search_results( &stdout );
        tracing::debug!( "Search returned {} tracks", tracks.len() );
        Ok( tracks )
    }


    /// Lists the entries of a remote playlist.
    pub async fn import_playlist( &self, url: &str ) -> Result<Vec<Track>, SearchError> {
        tracing::info!( "Importing playlist {}", url );
        let ( success, stdout ) = self.run( url ).await?;
        if !success {
            return Err( SearchError::Extractor( format!( "could not read playlist {}", url ) ) );
        }
        Ok( parse_playlist( &stdout ) )
    }


    async fn run( &self, target: &str ) -> Result<( bool, String ), SearchError> {
        let mut command = Command::new( &self.extractor );
        command
            .arg( target )
            .args([ "--dump-json", "--flat-playlist", "--no-warnings" ])
            .stdin( Stdio::null() )
            .stdout( Stdio::piped() )
            .stderr( Stdio::null() )
            .kill_on_drop( true );

        let output = tokio::time::timeout( self.timeout, command.output() )
            .await
            .map_err( |_| SearchError::Timeout( self.timeout.as_secs() ) )?
            .map_err( |source| SearchError::Spawn { bin: self.extractor.clone(), source } )?;

        Ok(( output.status.success(), String::from_utf8_lossy( &output.stdout ).into_owned() ))
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_search_filters_by_duration() {
        let output = concat!(
            r#"{"id":"a","title":"Song","uploader":"Band","duration":215.4}"#, "\n",
            r#"{"id":"b","title":"Intro","uploader":"Band","duration":5}"#, "\n",
            r#"{"id":"c","title":"Full Album","uploader":"Band","duration":3600}"#, "\n",
            "not json\n",
            r#"{"title":"No id"}"#, "\n",
            r#"{"id":"d","title":"Live"}"#, "\n",
        );

        let tracks = parse_search_results( output );

        assert_eq!( tracks.len(), 2 );
        assert_eq!( tracks[ 0 ], Track::new( "a", "Song", "Band", 215 ) );
        assert_eq!( tracks[ 1 ], Track::new( "d", "Live", "Unknown", 0 ) );
    }


    #[test]
    fn test_playlist_requires_title() {
        let output = concat!(
            r#"{"id":"a","title":"One","duration":100}"#, "\n",
            r#"{"id":"b"}"#, "\n",
            r#"{"id":"c","title":"Three","channel":"Chan","duration":4000}"#, "\n",
        );

        let tracks = parse_playlist( output );

        assert_eq!( tracks, vec![
            Track::new( "a", "One", "Playlist", 100 ),
            Track::new( "c", "Three", "Chan", 4000 ),
        ]);
    }


    #[test]
    fn test_search_query() {
        assert_eq!( search_query( " lofi ", 10, false ), "ytsearch10:lofi" );
        assert_eq!( search_query( "Daft Punk", 5, true ), "ytsearch5:Daft Punk official audio" );
    }


    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let searcher = Searcher::new( "yt-dlp", Duration::from_secs( 1 ) );
        assert!( matches!( searcher.search( "  ", 5, false ).await, Err( SearchError::EmptyQuery ) ) );
    }


    #[tokio::test]
    async fn test_missing_extractor() {
        let searcher = Searcher::new( "/nonexistent/devdeck-extractor", Duration::from_secs( 1 ) );
        let err = searcher.import_playlist( "https://list" ).await.unwrap_err();
        assert!( matches!( err, SearchError::Spawn { .. } ) );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_failed_import_is_an_error() {
        let searcher = Searcher::new( "false", Duration::from_secs( 5 ) );
        let err = searcher.import_playlist( "https://list" ).await.unwrap_err();
        assert!( matches!( err, SearchError::Extractor( _ ) ) );
    }
}
