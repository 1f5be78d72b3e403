//! Play queue and loop-advance logic
//!
//! Holds the ordered track list, the play cursor, and the loop mode that
//! decides where the cursor goes after a session finishes.

use std::fmt;
use std::str::FromStr;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::session::SessionOutcome;


/// Errors that can occur with queue operations.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum QueueError {
    #[error( "Index {index} is out of range (queue has {len} tracks)" )]
    OutOfRange { index: usize, len: usize },

    #[error( "Invalid loop mode: '{0}'. Use 'none', 'all', or 'one'" )]
    InvalidLoopMode( String ),
}


/// A queued playable item.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Track {
    /// Opaque handle the resolver turns into a stream address.
    pub id: String,
    pub title: String,
    pub author: String,
    /// Nominal duration in seconds, 0 when unknown.
    #[serde( default )]
    pub duration_secs: u64,
}


impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        duration_secs: u64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: author.into(),
            duration_secs,
        }
    }
}


/// Policy for advancing the cursor after a track finishes.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum LoopMode {
    #[default]
    None,
    All,
    One,
}


impl LoopMode {
    /// Returns the next mode in menu order: none, all, one.
    pub fn cycle( self ) -> Self {
        match self {
            LoopMode::None => LoopMode::All,
            LoopMode::All => LoopMode::One,
            LoopMode::One => LoopMode::None,
        }
    }


    /// Short label for status lines.
    pub fn label( &self ) -> &'static str {
        match self {
            LoopMode::None => "Off",
            LoopMode::All => "All",
            LoopMode::One => "One",
        }
    }
}


impl fmt::Display for LoopMode {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( match self {
            LoopMode::None => "NONE",
            LoopMode::All => "ALL",
            LoopMode::One => "ONE",
        })
    }
}


impl FromStr for LoopMode {
    type Err = QueueError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" | "0" => Ok( LoopMode::None ),
            "all" | "2" => Ok( LoopMode::All ),
            "one" | "1" => Ok( LoopMode::One ),
            _ => Err( QueueError::InvalidLoopMode( s.to_string() ) ),
        }
    }
}


/// Computes the cursor position after a session resolves.
///
/// Returns `None` when the run should stop.
pub fn next_index( current: usize, len: usize, mode: LoopMode, outcome: SessionOutcome ) -> Option<usize> {
    let next = match ( outcome, mode ) {
        ( SessionOutcome::Quit | SessionOutcome::Aborted, _ ) => return None,
        ( SessionOutcome::Ended, LoopMode::One ) => current,
        ( SessionOutcome::Skipped, LoopMode::One ) => current + 1,
        ( _, LoopMode::None | LoopMode::All ) => current + 1,
    };

    if next < len {
        Some( next )
    } else if mode == LoopMode::All && len > 0 {
        Some( 0 )
    } else {
        None
    }
}


/// Ordered track list with a play cursor.
#[derive( Debug, Default, Clone )]
pub struct Queue {
    tracks: Vec<Track>,
    current: usize,
    loop_mode: LoopMode,
    /// Slot of a current track removed mid-play; the next track already sits there.
    vacated: Option<usize>,
}


impl Queue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }


    /// Appends a track to the end of the queue.
    pub fn append( &mut self, track: Track ) {
        self.tracks.push( track );
    }


    /// Appends multiple tracks in order.
    pub fn extend( &mut self, tracks: impl IntoIterator<Item = Track> ) {
        self.tracks.extend( tracks );
    }


    /// Removes the track at `index`, shifting later entries down.
    ///
    /// The cursor keeps pointing at the same logical track when that track
    /// was not the one removed. Removing the current track leaves the cursor
    /// on whatever slid into its slot, and the next `advance` lands on that
    /// slot instead of stepping past it.
    pub fn remove_at( &mut self, index: usize ) -> Result<Track, QueueError> {
        if index >= self.tracks.len() {
            return Err( QueueError::OutOfRange { index, len: self.tracks.len() } );
        }

        let removed = self.tracks.remove( index );

        match self.vacated {
            Some( slot ) if index < slot => self.vacated = Some( slot - 1 ),
            Some( _ ) => {}
            None if index == self.current => self.vacated = Some( index ),
            None => {}
        }

        if index < self.current {
            self.current -= 1;
        } else if self.current >= self.tracks.len() {
            self.current = self.tracks.len().saturating_sub( 1 );
        }

        Ok( removed )
    }


    /// Resets to empty with the cursor at 0.
    pub fn clear( &mut self ) {
        self.tracks.clear();
        self.current = 0;
        self.vacated = None;
    }


    /// Replaces the whole track list and rewinds the cursor.
    pub fn replace( &mut self, tracks: Vec<Track> ) {
        self.tracks = tracks;
        self.current = 0;
        self.vacated = None;
    }


    /// Moves the cursor to `index`.
    pub fn jump_to( &mut self, index: usize ) -> Result<&Track, QueueError> {
        let len = self.tracks.len();
        match self.tracks.get( index ) {
            Some( track ) => {
                self.current = index;
                self.vacated = None;
                Ok( track )
            }
            None => Err( QueueError::OutOfRange { index, len } ),
        }
    }


    /// Applies the loop-advance rule for a finished session.
    ///
    /// Returns false when the run should stop. The cursor is left untouched
    /// in that case.
    pub fn advance( &mut self, outcome: SessionOutcome ) -> bool {
        let next = match ( self.vacated, outcome ) {
            ( _, SessionOutcome::Quit | SessionOutcome::Aborted ) => None,
            ( Some( slot ), _ ) => {
                self.vacated = None;
                if slot < self.tracks.len() {
                    Some( slot )
                } else if self.loop_mode == LoopMode::All && !self.tracks.is_empty() {
                    Some( 0 )
                } else {
                    None
                }
            }
            ( None, _ ) => next_index( self.current, self.tracks.len(), self.loop_mode, outcome ),
        };

        match next {
            Some( next ) => {
                self.current = next;
                true
            }
            None => false,
        }
    }


    /// Gets the track under the cursor.
    pub fn current( &self ) -> Option<&Track> {
        self.tracks.get( self.current )
    }


    pub fn current_index( &self ) -> usize {
        self.current
    }


    pub fn set_loop_mode( &mut self, mode: LoopMode ) {
        self.loop_mode = mode;
    }


    pub fn loop_mode( &self ) -> LoopMode {
        self.loop_mode
    }


    pub fn tracks( &self ) -> &[Track] {
        &self.tracks
    }


    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn track( id: &str, secs: u64 ) -> Track {
        Track::new( id, format!( "Title {}", id ), "Someone", secs )
    }


    fn queue_of( ids: &[&str], mode: LoopMode ) -> Queue {
        let mut queue = Queue::new();
        queue.extend( ids.iter().map( |id| track( id, 60 ) ) );
        queue.set_loop_mode( mode );
        queue
    }


    #[test]
    fn test_loop_all_wraps_forever() {
        let mut queue = queue_of( &[ "a", "b", "c" ], LoopMode::All );
        let mut seen = Vec::new();
        for _ in 0..7 {
            assert!( queue.advance( SessionOutcome::Ended ) );
            seen.push( queue.current_index() );
        }
        assert_eq!( seen, vec![ 1, 2, 0, 1, 2, 0, 1 ] );
    }


    #[test]
    fn test_loop_all_wraps_on_skip_too() {
        let mut queue = queue_of( &[ "a" ], LoopMode::All );
        assert!( queue.advance( SessionOutcome::Skipped ) );
        assert_eq!( queue.current_index(), 0 );
    }


    #[test]
    fn test_loop_one_replays_until_skipped() {
        let mut queue = queue_of( &[ "a" ], LoopMode::One );
        for _ in 0..3 {
            assert!( queue.advance( SessionOutcome::Ended ) );
            assert_eq!( queue.current_index(), 0 );
        }
        assert!( !queue.advance( SessionOutcome::Skipped ) );
    }


    #[test]
    fn test_loop_one_skip_moves_by_one() {
        let mut queue = queue_of( &[ "a", "b", "c" ], LoopMode::One );
        assert!( queue.advance( SessionOutcome::Skipped ) );
        assert_eq!( queue.current_index(), 1 );
        assert!( queue.advance( SessionOutcome::Ended ) );
        assert_eq!( queue.current_index(), 1 );
    }


    #[test]
    fn test_loop_none_stops_at_end() {
        let mut queue = queue_of( &[ "a", "b" ], LoopMode::None );
        assert!( queue.advance( SessionOutcome::Ended ) );
        assert_eq!( queue.current_index(), 1 );
        assert!( !queue.advance( SessionOutcome::Ended ) );
        assert_eq!( queue.current_index(), 1 );
    }


    #[test]
    fn test_quit_and_abort_never_advance() {
        for mode in [ LoopMode::None, LoopMode::All, LoopMode::One ] {
            assert_eq!( next_index( 0, 3, mode, SessionOutcome::Quit ), None );
            assert_eq!( next_index( 0, 3, mode, SessionOutcome::Aborted ), None );
        }
    }


    #[test]
    fn test_two_track_scenario_loop_all() {
        let mut queue = Queue::new();
        queue.append( track( "A", 180 ) );
        queue.append( track( "B", 120 ) );
        queue.set_loop_mode( LoopMode::All );

        assert!( queue.advance( SessionOutcome::Ended ) );
        assert_eq!( queue.current().map( |t| t.id.as_str() ), Some( "B" ) );
        assert!( queue.advance( SessionOutcome::Ended ) );
        assert_eq!( queue.current().map( |t| t.id.as_str() ), Some( "A" ) );
    }


    #[test]
    fn test_remove_before_cursor_keeps_logical_track() {
        let mut queue = queue_of( &[ "a", "b", "c", "d" ], LoopMode::None );
        queue.jump_to( 2 ).unwrap();

        let removed = queue.remove_at( 0 ).unwrap();
        assert_eq!( removed.id, "a" );
        assert_eq!( queue.len(), 3 );
        assert_eq!( queue.tracks()[ 0 ].id, "b" );
        assert_eq!( queue.current().unwrap().id, "c" );
    }


    #[test]
    fn test_remove_after_cursor_shifts_next_into_slot() {
        let mut queue = queue_of( &[ "a", "b", "c" ], LoopMode::None );
        queue.remove_at( 1 ).unwrap();
        assert_eq!( queue.tracks()[ 1 ].id, "c" );
        assert_eq!( queue.current().unwrap().id, "a" );
    }


    #[test]
    fn test_remove_current_last_clamps_cursor() {
        let mut queue = queue_of( &[ "a", "b" ], LoopMode::None );
        queue.jump_to( 1 ).unwrap();
        queue.remove_at( 1 ).unwrap();
        assert_eq!( queue.current_index(), 0 );
        assert_eq!( queue.current().unwrap().id, "a" );
    }


    #[test]
    fn test_removing_playing_track_lands_on_its_successor() {
        let mut queue = queue_of( &[ "a", "b", "c" ], LoopMode::None );
        queue.jump_to( 1 ).unwrap();

        queue.remove_at( 1 ).unwrap();
        assert!( queue.advance( SessionOutcome::Ended ) );
        assert_eq!( queue.current().unwrap().id, "c" );

        assert!( !queue.advance( SessionOutcome::Ended ) );
    }


    #[test]
    fn test_removing_playing_last_track_wraps_or_stops() {
        let mut queue = queue_of( &[ "a", "b" ], LoopMode::All );
        queue.jump_to( 1 ).unwrap();
        queue.remove_at( 1 ).unwrap();
        assert!( queue.advance( SessionOutcome::Skipped ) );
        assert_eq!( queue.current().unwrap().id, "a" );

        let mut queue = queue_of( &[ "a", "b" ], LoopMode::None );
        queue.jump_to( 1 ).unwrap();
        queue.remove_at( 1 ).unwrap();
        assert!( !queue.advance( SessionOutcome::Ended ) );
    }


    #[test]
    fn test_jump_clears_vacated_slot() {
        let mut queue = queue_of( &[ "a", "b", "c" ], LoopMode::None );
        queue.remove_at( 0 ).unwrap();
        queue.jump_to( 0 ).unwrap();
        assert!( queue.advance( SessionOutcome::Ended ) );
        assert_eq!( queue.current().unwrap().id, "c" );
    }


    #[test]
    fn test_remove_out_of_range() {
        let mut queue = queue_of( &[ "a" ], LoopMode::None );
        assert_eq!( queue.remove_at( 1 ), Err( QueueError::OutOfRange { index: 1, len: 1 } ) );
        assert_eq!( queue.len(), 1 );
    }


    #[test]
    fn test_clear_resets_cursor() {
        let mut queue = queue_of( &[ "a", "b" ], LoopMode::All );
        queue.jump_to( 1 ).unwrap();
        queue.clear();
        assert!( queue.is_empty() );
        assert_eq!( queue.current_index(), 0 );
        assert!( queue.current().is_none() );
        assert_eq!( queue.loop_mode(), LoopMode::All );
    }


    #[test]
    fn test_replace_rewinds() {
        let mut queue = queue_of( &[ "a", "b" ], LoopMode::None );
        queue.jump_to( 1 ).unwrap();
        queue.replace( vec![ track( "x", 0 ) ] );
        assert_eq!( queue.current_index(), 0 );
        assert_eq!( queue.current().unwrap().id, "x" );
    }


    #[test]
    fn test_loop_mode_parse_and_cycle() {
        assert_eq!( "ALL".parse::<LoopMode>().unwrap(), LoopMode::All );
        assert_eq!( "off".parse::<LoopMode>().unwrap(), LoopMode::None );
        assert!( "sometimes".parse::<LoopMode>().is_err() );
        assert_eq!( LoopMode::None.cycle().cycle(), LoopMode::One );
        assert_eq!( LoopMode::One.cycle(), LoopMode::None );
    }
}
