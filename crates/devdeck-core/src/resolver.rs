//! Stream address resolution
//!
//! Turns a track identifier into a directly playable stream address by
//! running the external extractor with an ordered list of strategies.
//! The first strategy that prints a usable address wins.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::PlayerConfig;


/// Base address for bare video identifiers.
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";


/// Errors that can occur while resolving a stream.
#[derive( Debug, Error )]
pub enum ResolveError {
    #[error( "No strategy could resolve a stream for '{track_id}'" )]
    ResolutionFailed { track_id: String },

    #[error( "Strategy '{strategy}' failed: {reason}" )]
    Strategy { strategy: String, reason: String },
}


/// Anything that can turn a track identifier into a stream address.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve( &self, track_id: &str ) -> Result<String, ResolveError>;
}


/// One extraction attempt profile.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Strategy {
    pub name: String,
    /// Extractor format selector.
    pub format: String,
    /// Extractor client profile, if the default one should be overridden.
    pub client: Option<String>,
}


impl Strategy {
    pub fn new( name: &str, format: &str, client: Option<&str> ) -> Self {
        Self {
            name: name.to_string(),
            format: format.to_string(),
            client: client.map( str::to_string ),
        }
    }
}


/// The default fallback order: best m4a audio, then alternate clients
/// with looser format preferences.
pub fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new( "m4a", "bestaudio[ext=m4a]/bestaudio", None ),
        Strategy::new( "android", "bestaudio", Some( "android" ) ),
        Strategy::new( "ios", "bestaudio/best", Some( "ios" ) ),
        Strategy::new( "web", "best", Some( "web" ) ),
    ]
}


/// Expands a bare identifier into a watch URL. Full URLs pass through.
pub fn watch_url( track_id: &str ) -> String {
    if track_id.contains( "://" ) {
        track_id.to_string()
    } else {
        format!( "{}{}", WATCH_URL, track_id )
    }
}


/// Returns the first line that begins with a URI scheme (`scheme://`).
pub fn first_stream_url( output: &str ) -> Option<&str> {
    output.lines()
        .map( str::trim )
        .find( |line| {
            match line.split_once( "://" ) {
                Some(( scheme, rest )) => {
                    !scheme.is_empty()
                        && !rest.is_empty()
                        && scheme.starts_with( |c: char| c.is_ascii_alphabetic() )
                        && scheme.chars().all( |c| c.is_ascii_alphanumeric() || matches!( c, '+' | '-' | '.' ) )
                }
                None => false,
            }
        })
}


/// Runs `attempt` for each strategy in order and returns the first success.
///
/// A failing strategy is logged and never stops the remaining ones.
pub async fn first_success<'a, F, Fut>( strategies: &'a [Strategy], mut attempt: F ) -> Option<String>
where
    F: FnMut( &'a Strategy ) -> Fut,
    Fut: Future<Output = Result<String, ResolveError>>,
{
    for strategy in strategies {
        match attempt( strategy ).await {
            Ok( url ) => {
                tracing::debug!( "Strategy '{}' resolved a stream", strategy.name );
                return Some( url );
            }
            Err( e ) => tracing::warn!( "{}", e ),
        }
    }
    None
}


/// Resolver backed by the external extractor binary.
#[derive( Debug, Clone )]
pub struct StreamResolver {
    extractor: PathBuf,
    timeout: Duration,
    strategies: Vec<Strategy>,
}


impl StreamResolver {
    /// Creates a resolver with the default strategy order.
    pub fn new( extractor: impl Into<PathBuf>, timeout: Duration ) -> Self {
        Self {
            extractor: extractor.into(),
            timeout,
            strategies: default_strategies(),
        }
    }


    pub fn from_config( config: &PlayerConfig ) -> Self {
        Self::new( config.extractor_bin.clone(), config.resolve_timeout() )
    }


    /// Builds the extractor arguments for one strategy.
    fn args( strategy: &Strategy, url: &str ) -> Vec<String> {
        let mut args = vec![
            url.to_string(),
            "--get-url".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "-f".to_string(),
            strategy.format.clone(),
        ];
        if let Some( ref client ) = strategy.client {
            args.push( "--extractor-args".to_string() );
            args.push( format!( "youtube:player_client={}", client ) );
        }
        args
    }


    /// Runs the extractor once with the given strategy.
    async fn attempt( &self, strategy: &Strategy, url: &str ) -> Result<String, ResolveError> {
        let fail = |reason: String| ResolveError::Strategy {
            strategy: strategy.name.clone(),
            reason,
        };

        tracing::debug!( "Resolving {} with strategy '{}'", url, strategy.name );

        let mut command = Command::new( &self.extractor );
        command
            .args( Self::args( strategy, url ) )
            .stdin( Stdio::null() )
            .stdout( Stdio::piped() )
            .stderr( Stdio::piped() )
            .kill_on_drop( true );

        let output = tokio::time::timeout( self.timeout, command.output() )
            .await
            .map_err( |_| fail( format!( "timed out after {}s", self.timeout.as_secs() ) ) )?
            .map_err( |e| fail( e.to_string() ) )?;

        let stdout = String::from_utf8_lossy( &output.stdout );
        if let Some( stream ) = first_stream_url( &stdout ) {
            return Ok( stream.to_string() );
        }

        let stderr = String::from_utf8_lossy( &output.stderr );
        let reason = stderr.lines()
            .rev()
            .find( |l| !l.trim().is_empty() )
            .map( |l| l.trim().to_string() )
            .unwrap_or_else( || format!( "no stream address in output ({})", output.status ) );
        Err( fail( reason ) )
    }
}


#[async_trait]
impl Resolve for StreamResolver {
    async fn resolve( &self, track_id: &str ) -> Result<String, ResolveError> {
        let url = watch_url( track_id );
        first_success( &self.strategies, |strategy| self.attempt( strategy, &url ) )
            .await
            .ok_or_else( || ResolveError::ResolutionFailed { track_id: track_id.to_string() } )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::cell::RefCell;


    #[test]
    fn test_watch_url_expands_ids() {
        assert_eq!( watch_url( "dQw4w9WgXcQ" ), "https://www.youtube.com/watch?v=dQw4w9WgXcQ" );
        assert_eq!( watch_url( "https://youtu.be/abc" ), "https://youtu.be/abc" );
    }


    #[test]
    fn test_first_stream_url_skips_noise() {
        let output = "WARNING: something\n\n  https://rr1.example/videoplayback?id=1\nhttps://second\n";
        assert_eq!( first_stream_url( output ), Some( "https://rr1.example/videoplayback?id=1" ) );
    }


    #[test]
    fn test_first_stream_url_rejects_non_uris() {
        assert_eq!( first_stream_url( "ERROR: unavailable\n://nothing\n" ), None );
        assert_eq!( first_stream_url( "" ), None );
    }


    #[test]
    fn test_args_include_client_profile() {
        let strategy = Strategy::new( "android", "bestaudio", Some( "android" ) );
        let args = StreamResolver::args( &strategy, "https://x/watch?v=1" );
        assert_eq!( args[ 0 ], "https://x/watch?v=1" );
        assert!( args.contains( &"youtube:player_client=android".to_string() ) );

        let plain = StreamResolver::args( &default_strategies()[ 0 ], "u" );
        assert!( !plain.iter().any( |a| a == "--extractor-args" ) );
    }


    #[tokio::test]
    async fn test_first_success_falls_through_failures() {
        let tried = RefCell::new( Vec::new() );
        let strategies = default_strategies();

        let result = first_success( &strategies, |strategy| {
            tried.borrow_mut().push( strategy.name.clone() );
            let name = strategy.name.clone();
            async move {
                if name == "ios" {
                    Ok( "https://stream/ios".to_string() )
                } else {
                    Err( ResolveError::Strategy { strategy: name, reason: "nope".into() } )
                }
            }
        }).await;

        assert_eq!( result.as_deref(), Some( "https://stream/ios" ) );
        assert_eq!( *tried.borrow(), vec![ "m4a", "android", "ios" ] );
    }


    #[tokio::test]
    async fn test_missing_extractor_is_resolution_failure() {
        let resolver = StreamResolver::new( "/nonexistent/devdeck-extractor", Duration::from_secs( 1 ) );
        let err = resolver.resolve( "abc" ).await.unwrap_err();
        assert!( matches!( err, ResolveError::ResolutionFailed { ref track_id } if track_id == "abc" ) );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_extractor_output_line_is_used() {
        // echo prints the watch URL first, which is enough to count as an address
        let resolver = StreamResolver::new( "echo", Duration::from_secs( 5 ) );
        let url = resolver.resolve( "abc" ).await.unwrap();
        assert!( url.starts_with( "https://www.youtube.com/watch?v=abc" ) );
    }
}
