/// Integration tests for IPC communication
/// These tests verify that commands and responses serialize correctly
/// and can be sent over IPC boundaries
use common::{
    Command, DaemonStatus, DeckError, EventType, Field, HandlerStatus, InputEvent, ModuleInfo,
    Response,
};

#[test]
fn test_knob_command_roundtrip() {
    let cmd = Command::Knob {
        index: 2,
        event: InputEvent::rotate(EventType::KnobCcw, 3),
    };

    let json = serde_json::to_string(&cmd).unwrap();
    let deserialized: Command = serde_json::from_str(&json).unwrap();

    match deserialized {
        Command::Knob { index, event } => {
            assert_eq!(index, 2);
            assert_eq!(event.event_type, EventType::KnobCcw);
            assert_eq!(event.rotate_notches, 3);
        }
        _ => panic!("Wrong command type"),
    }
}

#[test]
fn test_wire_shape() {
    // Hand-written clients rely on these exact shapes
    let json = serde_json::to_string(&Command::PressKey { index: 4 }).unwrap();
    assert_eq!(json, r#"{"PressKey":{"index":4}}"#);

    let json = serde_json::to_string(&Command::Ping).unwrap();
    assert_eq!(json, r#""Ping""#);

    let cmd: Command =
        serde_json::from_str(r#"{"Knob":{"index":0,"event":{"event_type":"KnobPress"}}}"#)
            .unwrap();
    assert!(matches!(
        cmd,
        Command::Knob { index: 0, event } if event == InputEvent::new(EventType::KnobPress)
    ));
}

#[test]
fn test_query_commands() {
    let commands = vec![
        Command::Query,
        Command::Ping,
        Command::ListModules,
        Command::Kill,
    ];

    for cmd in commands {
        let json = serde_json::to_string(&cmd).unwrap();
        let _deserialized: Command = serde_json::from_str(&json).unwrap();
    }
}

#[test]
fn test_unknown_command_rejected() {
    assert!(serde_json::from_str::<Command>(r#""Restart""#).is_err());
    assert!(serde_json::from_str::<Command>(r#"{"PressKey":{}}"#).is_err());
}

#[test]
fn test_response_types() {
    let resp = Response::Ok;
    let json = serde_json::to_string(&resp).unwrap();
    let deserialized: Response = serde_json::from_str(&json).unwrap();
    assert!(matches!(deserialized, Response::Ok));

    let resp = Response::Pong;
    let json = serde_json::to_string(&resp).unwrap();
    let deserialized: Response = serde_json::from_str(&json).unwrap();
    assert!(matches!(deserialized, Response::Pong));

    let resp = Response::Error(DeckError::NotFound("Key 9 has no key handler".to_string()));
    let json = serde_json::to_string(&resp).unwrap();
    match serde_json::from_str::<Response>(&json).unwrap() {
        Response::Error(e) => assert_eq!(e.to_string(), "Not found: Key 9 has no key handler"),
        _ => panic!("Wrong response type"),
    }
}

#[test]
fn test_status_response() {
    let resp = Response::Status(DaemonStatus {
        version: "0.1.0".to_string(),
        uptime_secs: 42,
        handlers: vec![HandlerStatus {
            slot: "knob 1".to_string(),
            module: "Volume".to_string(),
            running: true,
            frames: 17,
        }],
    });

    let json = serde_json::to_string(&resp).unwrap();
    match serde_json::from_str::<Response>(&json).unwrap() {
        Response::Status(status) => {
            assert_eq!(status.uptime_secs, 42);
            assert_eq!(status.handlers.len(), 1);
            assert_eq!(status.handlers[0].slot, "knob 1");
            assert_eq!(status.handlers[0].frames, 17);
        }
        _ => panic!("Wrong response type"),
    }
}

#[test]
fn test_modules_response() {
    let resp = Response::Modules(vec![ModuleInfo {
        name: "Playerctl".to_string(),
        icon_fields: None,
        key_fields: Some(vec![
            Field::text("Player Name", "player_name"),
            Field::select("Operation", "operation", &["PlayPause", "Next"]),
        ]),
        lcd_fields: None,
        knob_fields: None,
    }]);

    let json = serde_json::to_string(&resp).unwrap();
    // Empty descriptor lists are left out
    assert!(!json.contains("file_types"));

    match serde_json::from_str::<Response>(&json).unwrap() {
        Response::Modules(modules) => {
            let fields = modules[0].key_fields.as_ref().unwrap();
            assert_eq!(fields[1].list_items, vec!["PlayPause", "Next"]);
            assert!(modules[0].knob_fields.is_none());
        }
        _ => panic!("Wrong response type"),
    }
}
