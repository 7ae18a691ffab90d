fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tradesim_protocol::{
        DecisionAction, DecisionPayload, ErrorPayload, Frame, GameFrame, MessageType,
        NotificationPayload, SessionRef,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes JSON numbers so that `1250300` and `1250300.0` compare equal.
    ///
    /// The backend emits integral quantities without a fraction; `f64`
    /// fields re-serialize with one.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
    /// Returns the parsed value for further assertions.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_frame_envelope() {
        let frame: Frame = roundtrip_test("frame_envelope.json");
        assert_eq!(frame.kind, MessageType::Message);
        assert_eq!(frame.routing_key(), "/app/orders");
        assert_eq!(frame.headers.get("priority").map(String::as_str), Some("high"));
        assert_eq!(frame.timestamp.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn fixture_game_start() {
        let frame: Frame = roundtrip_test("game_start.json");
        assert_eq!(frame.kind, MessageType::GameStart);
        assert_eq!(frame.routing_key(), "GAME_START");
        let session: SessionRef = frame.parse_data().unwrap();
        assert_eq!(session.session_id, "sess-42");
    }

    #[test]
    fn fixture_frame_update() {
        let frame: GameFrame = roundtrip_test("frame_update.json");
        assert_eq!(frame.index, 17);
        assert!(frame.is_keypoint());
        assert_eq!(frame.ohlcv.stock_code, "000001");
        assert_eq!(frame.indicators.as_ref().map(|m| m.len()), Some(2));
    }

    #[test]
    fn fixture_decision() {
        let decision: DecisionPayload = roundtrip_test("decision.json");
        assert_eq!(decision.action, DecisionAction::Sell);
        assert_eq!(decision.quantity, Some(200.0));
    }

    #[test]
    fn fixture_notification() {
        let notification: NotificationPayload = roundtrip_test("notification.json");
        assert_eq!(notification.level.as_deref(), Some("success"));
        assert_eq!(notification.duration, Some(0));
    }

    #[test]
    fn fixture_error() {
        let error: ErrorPayload = roundtrip_test("error.json");
        assert_eq!(error.code.as_deref(), Some("SESSION_NOT_FOUND"));
    }

    #[test]
    fn unknown_frame_type_is_tolerated() {
        let frame: Frame = serde_json::from_str(
            r#"{"type":"SESSION_STATUS","data":{},"timestamp":"2024-03-01T09:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, MessageType::Unknown);
    }
}
