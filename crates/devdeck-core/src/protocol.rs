//! Control channel wire format
//!
//! One JSON object per line in each direction. Outbound lines carry a
//! `command` array; inbound lines are either tagged with an `event` name or
//! are replies to an earlier command.

use serde::Deserialize;
use serde_json::{ json, Value };


/// Observer id used for the end-of-file property subscription.
pub const OBS_EOF_REACHED: u64 = 1;


/// Commands the session can send to the player.
#[derive( Debug, Clone, PartialEq )]
pub enum ControlCommand {
    TogglePause,
    SeekRelative { seconds: i64 },
    SetVolume { percent: u8 },
    ObserveEofReached,
}


impl ControlCommand {
    /// Encodes the command as a single newline-terminated line.
    pub fn encode( &self, request_id: u64 ) -> String {
        let command = match self {
            ControlCommand::TogglePause => json!([ "cycle", "pause" ]),
            ControlCommand::SeekRelative { seconds } => json!([ "seek", seconds, "relative" ]),
            ControlCommand::SetVolume { percent } => json!([ "set_property", "volume", percent ]),
            ControlCommand::ObserveEofReached => json!([ "observe_property", OBS_EOF_REACHED, "eof-reached" ]),
        };

        let mut line = json!({ "command": command, "request_id": request_id }).to_string();
        line.push( '\n' );
        line
    }
}


/// Events decoded from the player's side of the channel.
#[derive( Debug, Clone, PartialEq )]
pub enum ChannelEvent {
    /// The current file played to its natural end.
    EndOfFile,

    /// The file ended for another reason (error, stop, quit...).
    FileEnded { reason: String },

    /// The player is shutting down.
    Shutdown,

    /// Pause state reported by the player.
    Pause( bool ),

    /// A reply to one of our commands.
    Reply { request_id: Option<u64>, error: String },

    /// Any other tagged event.
    Other( String ),
}


impl ChannelEvent {
    /// True for the events that finish a track.
    pub fn ends_track( &self ) -> bool {
        matches!( self, ChannelEvent::EndOfFile | ChannelEvent::Shutdown )
    }
}


/// Raw inbound message shape.
#[derive( Debug, Deserialize )]
struct RawMessage {
    event: Option<String>,
    name: Option<String>,
    data: Option<Value>,
    reason: Option<String>,
    error: Option<String>,
    request_id: Option<u64>,
}


/// Decodes one inbound line.
///
/// Returns `None` for blank or malformed lines.
pub fn decode_line( line: &str ) -> Option<ChannelEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let raw: RawMessage = match serde_json::from_str( line ) {
        Ok( raw ) => raw,
        Err( e ) => {
            tracing::debug!( "Dropping malformed channel line: {}", e );
            return None;
        }
    };

    let Some( event ) = raw.event else {
        return Some( ChannelEvent::Reply {
            request_id: raw.request_id,
            error: raw.error.unwrap_or_else( || "success".to_string() ),
        });
    };

    let event = match event.as_str() {
        "property-change" => match ( raw.name.as_deref(), raw.data.as_ref().and_then( Value::as_bool ) ) {
            ( Some( "eof-reached" ), Some( true ) ) => ChannelEvent::EndOfFile,
            ( Some( "pause" ), Some( paused ) ) => ChannelEvent::Pause( paused ),
            _ => ChannelEvent::Other( event.clone() ),
        },
        "end-file" => match raw.reason.as_deref() {
            Some( "eof" ) => ChannelEvent::EndOfFile,
            other => ChannelEvent::FileEnded { reason: other.unwrap_or( "unknown" ).to_string() },
        },
        "shutdown" => ChannelEvent::Shutdown,
        "pause" => ChannelEvent::Pause( true ),
        "unpause" => ChannelEvent::Pause( false ),
        _ => ChannelEvent::Other( event.clone() ),
    };

    Some( event )
}


#[cfg( test )]
mod tests {
    use super::*;


    fn decoded_command( cmd: ControlCommand ) -> Value {
        let line = cmd.encode( 7 );
        assert!( line.ends_with( '\n' ) );
        assert_eq!( line.matches( '\n' ).count(), 1 );
        let value: Value = serde_json::from_str( line.trim_end() ).unwrap();
        assert_eq!( value[ "request_id" ], 7 );
        value[ "command" ].clone()
    }


    #[test]
    fn test_encode_vocabulary() {
        assert_eq!( decoded_command( ControlCommand::TogglePause ), json!([ "cycle", "pause" ]) );
        assert_eq!( decoded_command( ControlCommand::SeekRelative { seconds: -10 } ), json!([ "seek", -10, "relative" ]) );
        assert_eq!( decoded_command( ControlCommand::SetVolume { percent: 55 } ), json!([ "set_property", "volume", 55 ]) );
        assert_eq!(
            decoded_command( ControlCommand::ObserveEofReached ),
            json!([ "observe_property", 1, "eof-reached" ])
        );
    }


    #[test]
    fn test_decode_eof_property() {
        let line = r#"{"event":"property-change","id":1,"name":"eof-reached","data":true}"#;
        assert_eq!( decode_line( line ), Some( ChannelEvent::EndOfFile ) );

        let not_yet = r#"{"event":"property-change","id":1,"name":"eof-reached","data":false}"#;
        assert_eq!( decode_line( not_yet ), Some( ChannelEvent::Other( "property-change".into() ) ) );
    }


    #[test]
    fn test_decode_end_file_reasons() {
        assert_eq!( decode_line( r#"{"event":"end-file","reason":"eof"}"# ), Some( ChannelEvent::EndOfFile ) );
        assert_eq!(
            decode_line( r#"{"event":"end-file","reason":"error"}"# ),
            Some( ChannelEvent::FileEnded { reason: "error".into() } )
        );
    }


    #[test]
    fn test_decode_shutdown_and_replies() {
        assert_eq!( decode_line( r#"{"event":"shutdown"}"# ), Some( ChannelEvent::Shutdown ) );
        assert_eq!(
            decode_line( r#"{"request_id":3,"error":"success","data":null}"# ),
            Some( ChannelEvent::Reply { request_id: Some( 3 ), error: "success".into() } )
        );
    }


    #[test]
    fn test_decode_ignores_garbage() {
        assert_eq!( decode_line( "" ), None );
        assert_eq!( decode_line( "   " ), None );
        assert_eq!( decode_line( "not json" ), None );
    }


    #[test]
    fn test_ends_track() {
        assert!( ChannelEvent::EndOfFile.ends_track() );
        assert!( ChannelEvent::Shutdown.ends_track() );
        assert!( !ChannelEvent::FileEnded { reason: "stop".into() }.ends_track() );
        assert!( !ChannelEvent::Pause( true ).ends_track() );
    }
}
