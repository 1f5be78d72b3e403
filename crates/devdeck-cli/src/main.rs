//! DevDeck CLI - Terminal command center with a media queue

mod cli;
mod frontend;
mod playlists;
mod settings;
mod shell;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{ Context, Result };
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Args;
use playlists::PlaylistStore;
use settings::Settings;
use shell::{ Flow, Shell };

use devdeck_core::Command;


/// Returns the log file path, creating its directory.
fn log_path() -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .unwrap_or_else( std::env::temp_dir )
        .join( "devdeck" );
    std::fs::create_dir_all( &dir )
        .with_context( || format!( "Failed to create {}", dir.display() ) )?;
    Ok( dir.join( "devdeck.log" ) )
}


/// Sends logs to a file; the terminal belongs to the shell and player view.
fn init_logging() -> Result<PathBuf> {
    let path = log_path()?;
    let file = OpenOptions::new()
        .create( true )
        .append( true )
        .open( &path )
        .with_context( || format!( "Failed to open log file {}", path.display() ) )?;

    let filter = EnvFilter::try_from_env( "DEVDECK_LOG" )
        .unwrap_or_else( |_| EnvFilter::new( "info" ) );

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_ansi( false )
        .with_writer( Mutex::new( file ) )
        .try_init()
        .map_err( |e| anyhow::anyhow!( "Failed to install logger: {}", e ) )?;

    Ok( path )
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match init_logging() {
        Ok( path ) => tracing::info!( "devdeck {} starting, logging to {}", env!( "CARGO_PKG_VERSION" ), path.display() ),
        Err( e ) => eprintln!( "Logging disabled: {:#}", e ),
    }

    let settings_path = args.settings.clone().or_else( Settings::default_path );
    let settings = Settings::load( settings_path.as_deref() );
    let mut shell = Shell::new( settings, settings_path, PlaylistStore::default_location() );

    if let Some( mode ) = args.loop_mode {
        shell.orchestrator().set_loop_mode( mode );
    }

    let has_tracks = !args.tracks.is_empty();
    for id in args.tracks {
        shell.dispatch( Command::Add { id } ).await;
    }

    if has_tracks {
        let start = if args.background { Command::Background } else { Command::Play };
        let flow = shell.dispatch( start ).await;
        for line in shell.take_output() {
            println!( "{}", line );
        }
        if flow == Flow::Quit {
            return Ok(());
        }
    }

    let result = shell.run().await;
    tracing::info!( "devdeck exiting" );
    result
}
