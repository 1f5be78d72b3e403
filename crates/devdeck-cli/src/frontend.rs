//! Full-screen transport view for foreground playback
//!
//! Owns the terminal (raw mode + alternate screen) for the length of a
//! foreground run. Key presses are read on a dedicated thread while a
//! session has the keyboard attached.

use std::io::{ self, Stdout };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::{
    event::{ self, Event, KeyCode, KeyEventKind, KeyModifiers },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, Paragraph },
};
use tokio::sync::mpsc::UnboundedSender;

use devdeck_core::{ Frontend, NowPlaying, SessionControl, SessionState };


const PROGRESS_WIDTH: usize = 30;


/// Maps a key press to a transport control.
pub fn map_key( code: KeyCode, modifiers: KeyModifiers ) -> Option<SessionControl> {
    match code {
        KeyCode::Char( 'c' ) if modifiers.contains( KeyModifiers::CONTROL ) => Some( SessionControl::Quit ),
        KeyCode::Char( ' ' ) | KeyCode::Char( 'p' ) => Some( SessionControl::TogglePause ),
        KeyCode::Left => Some( SessionControl::SeekBack ),
        KeyCode::Right => Some( SessionControl::SeekForward ),
        KeyCode::Up | KeyCode::Char( '+' ) | KeyCode::Char( '=' ) => Some( SessionControl::VolumeUp ),
        KeyCode::Down | KeyCode::Char( '-' ) => Some( SessionControl::VolumeDown ),
        KeyCode::Char( 'q' ) | KeyCode::Char( 'n' ) | KeyCode::Char( 's' ) => Some( SessionControl::Skip ),
        KeyCode::Esc => Some( SessionControl::Quit ),
        _ => None,
    }
}


/// Formats seconds as M:SS.
pub fn format_time( secs: u64 ) -> String {
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


/// Draws a fixed-width progress bar. Unknown progress renders hatched.
pub fn progress_bar( progress: Option<f64>, width: usize ) -> String {
    match progress {
        Some( progress ) => {
            let filled = ( progress.clamp( 0.0, 1.0 ) * width as f64 ).round() as usize;
            format!( "[{}{}]", "█".repeat( filled ), "─".repeat( width - filled ) )
        }
        None => format!( "[{}]", "░".repeat( width ) ),
    }
}


/// Keyboard reader thread.
struct KeyListener {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}


impl KeyListener {
    fn spawn( controls: UnboundedSender<SessionControl> ) -> Self {
        let stop = Arc::new( AtomicBool::new( false ) );
        let flag = Arc::clone( &stop );

        let thread = std::thread::spawn( move || {
            while !flag.load( Ordering::Relaxed ) {
                match event::poll( Duration::from_millis( 100 ) ) {
                    Ok( true ) => match event::read() {
                        Ok( Event::Key( key ) ) if key.kind == KeyEventKind::Press => {
                            if let Some( control ) = map_key( key.code, key.modifiers ) {
                                if controls.send( control ).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok( _ ) => {}
                        Err( e ) => {
                            tracing::warn!( "Keyboard read failed: {}", e );
                            break;
                        }
                    },
                    Ok( false ) => {}
                    Err( e ) => {
                        tracing::warn!( "Keyboard poll failed: {}", e );
                        break;
                    }
                }
            }
        });

        Self { stop, thread: Some( thread ) }
    }


    fn stop( &mut self ) {
        self.stop.store( true, Ordering::Relaxed );
        if let Some( thread ) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!( "Keyboard thread panicked" );
            }
        }
    }
}


/// Frontend that draws into the terminal.
pub struct TerminalFrontend {
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
    keyboard: Option<KeyListener>,
    notice: String,
    last_view: Option<NowPlaying>,
}


impl TerminalFrontend {
    /// Takes over the terminal.
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        io::stdout().execute( EnterAlternateScreen )?;
        let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;
        terminal.clear()?;

        Ok( Self {
            terminal: Some( terminal ),
            keyboard: None,
            notice: String::new(),
            last_view: None,
        })
    }


    /// Gives the terminal back. Safe to call more than once.
    pub fn leave( &mut self ) {
        if let Some( mut keyboard ) = self.keyboard.take() {
            keyboard.stop();
        }
        if self.terminal.take().is_some() {
            if let Err( e ) = disable_raw_mode() {
                tracing::warn!( "Failed to leave raw mode: {}", e );
            }
            if let Err( e ) = io::stdout().execute( LeaveAlternateScreen ) {
                tracing::warn!( "Failed to leave alternate screen: {}", e );
            }
        }
    }


    fn redraw( &mut self ) {
        let ( Some( terminal ), Some( view ) ) = ( self.terminal.as_mut(), self.last_view.as_ref() ) else {
            return;
        };
        let notice = self.notice.as_str();
        if let Err( e ) = terminal.draw( |frame| draw_transport( frame, view, notice ) ) {
            tracing::debug!( "Draw failed: {}", e );
        }
    }
}


impl Frontend for TerminalFrontend {
    fn attach( &mut self, controls: UnboundedSender<SessionControl> ) -> bool {
        if self.terminal.is_none() {
            return false;
        }
        if let Some( mut old ) = self.keyboard.take() {
            old.stop();
        }
        self.keyboard = Some( KeyListener::spawn( controls ) );
        true
    }


    fn render( &mut self, view: &NowPlaying ) {
        self.last_view = Some( view.clone() );
        self.redraw();
    }


    fn notice( &mut self, message: &str ) {
        if !message.is_empty() {
            tracing::info!( "{}", message );
        }
        self.notice = message.to_string();
        self.redraw();
    }


    fn detach( &mut self ) {
        if let Some( mut keyboard ) = self.keyboard.take() {
            keyboard.stop();
        }
    }
}


impl Drop for TerminalFrontend {
    fn drop( &mut self ) {
        self.leave();
    }
}


/// Draws the transport view.
fn draw_transport( frame: &mut Frame, view: &NowPlaying, notice: &str ) {
    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 6 ),  // Now playing
            Constraint::Length( 1 ),  // Notice
            Constraint::Min( 0 ),
            Constraint::Length( 1 ),  // Key help
        ])
        .split( frame.area() );

    draw_now_playing( frame, view, chunks[0] );

    let notice_line = if !notice.is_empty() {
        Span::styled( format!( " {}", notice ), Style::default().fg( Color::Yellow ) )
    } else if !view.live_control && view.state != SessionState::Loading {
        Span::styled( " Controls unavailable, playback continues", Style::default().fg( Color::DarkGray ) )
    } else {
        Span::raw( "" )
    };
    frame.render_widget( Paragraph::new( Line::from( notice_line ) ), chunks[1] );

    let help = Paragraph::new( " space pause  ←/→ seek  ↑/↓ volume  q/n skip  esc/ctrl+c stop" )
        .style( Style::default().fg( Color::DarkGray ) );
    frame.render_widget( help, chunks[3] );
}


fn draw_now_playing( frame: &mut Frame, view: &NowPlaying, area: Rect ) {
    let state_str = match view.state {
        SessionState::Loading => "…",
        SessionState::Playing => "▶",
        SessionState::Paused => "⏸",
        SessionState::Ended | SessionState::Skipped | SessionState::Aborted => "■",
    };

    let total = if view.total > 0 { format_time( view.total ) } else { "--:--".to_string() };

    let mut lines = vec![
        Line::from( Span::styled( format!( " {} {} ", state_str, view.title ), Style::default().bold() ) ),
    ];

    if !view.author.is_empty() {
        lines.push( Line::from( Span::styled( format!( "   {} ", view.author ), Style::default().fg( Color::Gray ) ) ) );
    }

    lines.push( Line::from( format!(
        " {} {} / {} ",
        progress_bar( view.progress, PROGRESS_WIDTH ),
        format_time( view.elapsed ),
        total,
    )));

    lines.push( Line::from( Span::styled(
        format!(
            " vol {}%  loop {}  track {}/{} ",
            view.volume,
            view.loop_mode.label(),
            view.position + 1,
            view.queue_len,
        ),
        Style::default().fg( Color::Cyan ),
    )));

    let now_playing = Paragraph::new( lines )
        .block( Block::default().title( " Now Playing " ).borders( Borders::ALL ) );

    frame.render_widget( now_playing, area );
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_key_vocabulary() {
        let none = KeyModifiers::NONE;
        assert_eq!( map_key( KeyCode::Char( ' ' ), none ), Some( SessionControl::TogglePause ) );
        assert_eq!( map_key( KeyCode::Left, none ), Some( SessionControl::SeekBack ) );
        assert_eq!( map_key( KeyCode::Right, none ), Some( SessionControl::SeekForward ) );
        assert_eq!( map_key( KeyCode::Char( '+' ), none ), Some( SessionControl::VolumeUp ) );
        assert_eq!( map_key( KeyCode::Down, none ), Some( SessionControl::VolumeDown ) );
        assert_eq!( map_key( KeyCode::Char( 'n' ), none ), Some( SessionControl::Skip ) );
        assert_eq!( map_key( KeyCode::Char( 'q' ), none ), Some( SessionControl::Skip ) );
        assert_eq!( map_key( KeyCode::Esc, none ), Some( SessionControl::Quit ) );
        assert_eq!( map_key( KeyCode::Char( 'c' ), KeyModifiers::CONTROL ), Some( SessionControl::Quit ) );
        assert_eq!( map_key( KeyCode::Char( 'x' ), none ), None );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( 0 ), "0:00" );
        assert_eq!( format_time( 75 ), "1:15" );
        assert_eq!( format_time( 3601 ), "60:01" );
    }


    #[test]
    fn test_progress_bar() {
        assert_eq!( progress_bar( Some( 0.5 ), 4 ), "[██──]" );
        assert_eq!( progress_bar( Some( 2.0 ), 2 ), "[██]" );
        assert_eq!( progress_bar( None, 3 ), "[░░░]" );
    }
}
