use asr_loadtest::audio::{AudioEncoding, AudioFormat};
use asr_loadtest::nats::messages::{AudioFrameMessage, ControlAction, ControlMessage, EventMessage, StartMessage};
use asr_loadtest::transport::{EventKind, StartParams};
use base64::Engine;

#[test]
fn test_audio_frame_serialization() {
    let msg = AudioFrameMessage {
        session_id: "w000-i0001-abc".to_string(),
        sequence: 0,
        encoding: "pcm".to_string(),
        audio: base64::engine::general_purpose::STANDARD.encode([0u8; 100]),
        timestamp: "2025-10-27T14:30:00Z".to_string(),
    };

    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("w000-i0001-abc"));
    assert!(json.contains("\"sequence\":0"));
    assert!(json.contains("\"encoding\":\"pcm\""));

    let deserialized: AudioFrameMessage = serde_json::from_str(&json).unwrap();
    let audio = base64::engine::general_purpose::STANDARD
        .decode(&deserialized.audio)
        .unwrap();
    assert_eq!(audio.len(), 100);
}

#[test]
fn test_start_message_fields() {
    let params = StartParams {
        format: AudioFormat::new(AudioEncoding::Opus, 8000),
        max_sentence_silence_ms: Some(800),
        punctuation: false,
        token: "secret".to_string(),
        ..StartParams::default()
    };

    let msg = StartMessage::new("w001-i0002-abc", &params);
    let json = serde_json::to_value(&msg).unwrap();

    assert_eq!(json["format"], "opus");
    assert_eq!(json["sample_rate"], 8000);
    assert_eq!(json["max_sentence_silence"], 800);
    assert_eq!(json["enable_intermediate_result"], true);
    assert_eq!(json["enable_punctuation_prediction"], false);
    assert_eq!(json["token"], "secret");

    // Unset silence leaves the service default
    let msg = StartMessage::new("w001-i0002-abc", &StartParams::default());
    let json = serde_json::to_value(&msg).unwrap();
    assert!(json.get("max_sentence_silence").is_none());
}

#[test]
fn test_control_message_subjects() {
    let stop = ControlMessage::new("s", ControlAction::Stop);
    assert_eq!(stop.action.subject(), "asr.control.stop");
    assert!(serde_json::to_string(&stop).unwrap().contains("\"action\":\"stop\""));
    assert_eq!(ControlAction::Cancel.subject(), "asr.control.cancel");
}

#[test]
fn test_event_deserialization() {
    let json = r#"{
        "session_id": "w000-i0001-abc",
        "status_code": 20000000,
        "timestamp": "2025-10-27T14:30:05Z",
        "event": "sentence_end",
        "index": 2,
        "text": "Hello world",
        "begin_time_ms": 1200,
        "end_time_ms": 2500,
        "confidence": 0.95
    }"#;

    let msg: EventMessage = serde_json::from_str(json).unwrap();
    let event = msg.into_event();
    assert_eq!(event.session_id, "w000-i0001-abc");
    assert_eq!(event.timestamp.to_rfc3339(), "2025-10-27T14:30:05+00:00");
    match event.kind {
        EventKind::SentenceEnd { index, text, end_time_ms, .. } => {
            assert_eq!(index, 2);
            assert_eq!(text, "Hello world");
            assert_eq!(end_time_ms, 2500);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_task_failed_event() {
    let json = r#"{
        "session_id": "w000-i0001-abc",
        "status_code": 41010105,
        "timestamp": "not a timestamp",
        "event": "task_failed",
        "error_message": "meta:timeout"
    }"#;

    let event = serde_json::from_str::<EventMessage>(json).unwrap().into_event();
    assert_eq!(event.status_code, 41_010_105);
    assert_eq!(
        event.kind,
        EventKind::TaskFailed {
            error_message: "meta:timeout".to_string()
        }
    );
}

#[test]
fn test_unknown_event_rejected() {
    let json = r#"{"session_id":"s","status_code":0,"timestamp":"","event":"bogus"}"#;
    assert!(serde_json::from_str::<EventMessage>(json).is_err());
}
