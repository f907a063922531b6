//! Property-list payload decoding for `game_status_update` frames.
//!
//! The push channel carries the game state as an XML property list embedded
//! in a JSON string. A typical document:
//!
//! ```xml
//! <plist version="1.0">
//! <dict>
//!     <key>status_code</key>     <string>ONGOING</string>
//!     <key>team_id</key>         <integer>1</integer>
//!     <key>teams_info</key>
//!     <array>
//!         <dict>
//!             <key>id</key>           <string>1</string>
//!             <key>name</key>         <string>cc</string>
//!             <key>score</key>        <string>3</string>
//!             <key>has_finished</key> <string>True</string>
//!             <key>time_penalty</key> <integer>0</integer>
//!         </dict>
//!     </array>
//! </dict>
//! </plist>
//! ```
//!
//! Decoding keeps every scalar in its wire representation (see
//! [`WireNumber`]); [`encode_game_status`] writes the same shape back out.

use std::io::Cursor;

use plist::{Dictionary, Value};
use tracing::warn;

use crate::error::DecodeError;
use crate::status::{GameStatus, TeamInfo, TreasureRef, WireFlag, WireNumber};

const KEY_STATUS_CODE: &str = "status_code";
const KEY_TEAM_ID: &str = "team_id";
const KEY_TEAMS_INFO: &str = "teams_info";

/// Literal the backend uses for absent coordinates.
const NONE_LITERAL: &str = "None";

/// Decode a property-list document into a [`GameStatus`].
///
/// Both XML and binary property lists are accepted.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the document is malformed, the root is not a
/// dictionary, `status_code` is missing or not a string, or `teams_info` is
/// not an array. Problems inside a single team never fail the snapshot: a
/// mistyped field decodes as absent and a team without a readable id is
/// skipped, both with a warning.
pub fn decode_game_status(document: &str) -> Result<GameStatus, DecodeError> {
    let root = Value::from_reader(Cursor::new(document.as_bytes()))?;
    let root = root
        .as_dictionary()
        .ok_or(DecodeError::NotADictionary("root"))?;

    let status_code = match root.get(KEY_STATUS_CODE) {
        Some(value) => value
            .as_string()
            .ok_or(DecodeError::InvalidField {
                field: KEY_STATUS_CODE,
                expected: "string",
            })?
            .to_string(),
        None => return Err(DecodeError::MissingField(KEY_STATUS_CODE)),
    };

    let focus_team_id = lenient(root, KEY_TEAM_ID, wire_number);

    let teams = match root.get(KEY_TEAMS_INFO) {
        None => Vec::new(),
        Some(value) => value
            .as_array()
            .ok_or(DecodeError::InvalidField {
                field: KEY_TEAMS_INFO,
                expected: "array",
            })?
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match decode_team(entry) {
                Ok(team) => Some(team),
                Err(e) => {
                    warn!(index, error = %e, "skipping unreadable team entry");
                    None
                }
            })
            .collect(),
    };

    Ok(GameStatus::new(status_code, focus_team_id, teams))
}

/// Decode one `teams_info` entry. Only an entry that is not a dictionary or
/// has no readable id fails; every other mistyped field decodes as absent.
fn decode_team(value: &Value) -> Result<TeamInfo, DecodeError> {
    let dict = value
        .as_dictionary()
        .ok_or(DecodeError::NotADictionary(KEY_TEAMS_INFO))?;

    let id = lenient(dict, "id", wire_number).ok_or(DecodeError::MissingField("id"))?;

    let found_treasures = lenient(dict, "found_treasures", Value::as_array)
        .map(|entries| entries.iter().filter_map(treasure_ref).collect())
        .unwrap_or_default();

    Ok(TeamInfo {
        id,
        name: lenient(dict, "name", Value::as_string)
            .unwrap_or_default()
            .to_string(),
        score: lenient(dict, "score", wire_number),
        has_finished: lenient(dict, "has_finished", wire_flag),
        found_treasures,
        game_duration: lenient(dict, "game_duration", wire_number),
        start_time: lenient(dict, "start_time", wire_number),
        score_adjustment: lenient(dict, "score_adjustment", wire_number),
        time_penalty: lenient(dict, "time_penalty", wire_number),
        is_in_game: lenient(dict, "is_in_game", Value::as_boolean),
        latitude: coordinate(dict, "latitude"),
        longitude: coordinate(dict, "longitude"),
        challenge_penalty: lenient(dict, "challenge_penalty", Value::as_array)
            .cloned()
            .unwrap_or_default(),
    })
}

/// Read `field` with `read`. A present value of the wrong type is logged and
/// treated as absent.
fn lenient<'a, T>(
    dict: &'a Dictionary,
    field: &'static str,
    read: impl FnOnce(&'a Value) -> Option<T>,
) -> Option<T> {
    let value = dict.get(field)?;
    let parsed = read(value);
    if parsed.is_none() {
        warn!(field, "ignoring mistyped snapshot field");
    }
    parsed
}

fn wire_number(value: &Value) -> Option<WireNumber> {
    match value.as_string() {
        Some(text) => Some(WireNumber::Text(text.to_string())),
        None => value.as_signed_integer().map(WireNumber::Integer),
    }
}

fn wire_flag(value: &Value) -> Option<WireFlag> {
    match value.as_boolean() {
        Some(b) => Some(WireFlag::Boolean(b)),
        None => value.as_string().map(|s| WireFlag::Text(s.to_string())),
    }
}

fn treasure_ref(value: &Value) -> Option<TreasureRef> {
    let id = value
        .as_dictionary()
        .and_then(|dict| dict.get("id"))
        .and_then(wire_number)
        .and_then(|id| id.as_i64());
    if id.is_none() {
        warn!("skipping found treasure without a readable id");
    }
    id.map(|id| TreasureRef { id })
}

fn coordinate(dict: &Dictionary, field: &'static str) -> Option<String> {
    lenient(dict, field, Value::as_string)
        .filter(|text| *text != NONE_LITERAL)
        .map(str::to_string)
}

// ── Encoding ────────────────────────────────────────────────────────

/// Encode a [`GameStatus`] back into an XML property list.
///
/// Wire representations are written as they were decoded, so
/// `decode(encode(decode(doc)))` equals `decode(doc)`.
///
/// # Errors
///
/// Returns [`DecodeError::Plist`] if the writer fails.
pub fn encode_game_status(status: &GameStatus) -> Result<String, DecodeError> {
    let mut root = Dictionary::new();
    root.insert(
        KEY_STATUS_CODE.to_string(),
        Value::String(status.status_code.clone()),
    );
    if let Some(focus) = &status.focus_team_id {
        root.insert(KEY_TEAM_ID.to_string(), number_value(focus));
    }
    root.insert(
        KEY_TEAMS_INFO.to_string(),
        Value::Array(status.teams.iter().map(encode_team).collect()),
    );

    let mut buf = Vec::new();
    Value::Dictionary(root).to_writer_xml(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn encode_team(team: &TeamInfo) -> Value {
    let mut dict = Dictionary::new();
    dict.insert(
        "challenge_penalty".to_string(),
        Value::Array(team.challenge_penalty.clone()),
    );
    dict.insert(
        "found_treasures".to_string(),
        Value::Array(
            team.found_treasures
                .iter()
                .map(|treasure| {
                    let mut entry = Dictionary::new();
                    entry.insert("id".to_string(), Value::Integer(treasure.id.into()));
                    Value::Dictionary(entry)
                })
                .collect(),
        ),
    );
    dict.insert("id".to_string(), number_value(&team.id));
    dict.insert("name".to_string(), Value::String(team.name.clone()));

    let numbers = [
        ("score", &team.score),
        ("game_duration", &team.game_duration),
        ("start_time", &team.start_time),
        ("score_adjustment", &team.score_adjustment),
        ("time_penalty", &team.time_penalty),
    ];
    for (key, value) in numbers {
        if let Some(value) = value {
            dict.insert(key.to_string(), number_value(value));
        }
    }

    if let Some(flag) = &team.has_finished {
        let value = match flag {
            WireFlag::Boolean(b) => Value::Boolean(*b),
            WireFlag::Text(text) => Value::String(text.clone()),
        };
        dict.insert("has_finished".to_string(), value);
    }
    if let Some(in_game) = team.is_in_game {
        dict.insert("is_in_game".to_string(), Value::Boolean(in_game));
    }
    for (key, coordinate) in [("latitude", &team.latitude), ("longitude", &team.longitude)] {
        let text = coordinate.as_deref().unwrap_or(NONE_LITERAL);
        dict.insert(key.to_string(), Value::String(text.to_string()));
    }

    Value::Dictionary(dict)
}

fn number_value(number: &WireNumber) -> Value {
    match number {
        WireNumber::Integer(n) => Value::Integer((*n).into()),
        WireNumber::Text(text) => Value::String(text.clone()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>status_code</key>
	<string>ONGOING</string>
	<key>team_id</key>
	<integer>1</integer>
	<key>teams_info</key>
	<array>
		<dict>
			<key>challenge_penalty</key>
			<array/>
			<key>found_treasures</key>
			<array>
				<dict>
					<key>id</key>
					<integer>332225</integer>
				</dict>
				<dict>
					<key>id</key>
					<integer>332565</integer>
				</dict>
			</array>
			<key>game_duration</key>
			<integer>6</integer>
			<key>has_finished</key>
			<string>True</string>
			<key>id</key>
			<string>1</string>
			<key>is_in_game</key>
			<true/>
			<key>latitude</key>
			<string>None</string>
			<key>longitude</key>
			<string>None</string>
			<key>name</key>
			<string>cc</string>
			<key>score</key>
			<string>3</string>
			<key>score_adjustment</key>
			<string>0</string>
			<key>start_time</key>
			<string>1761639609000</string>
			<key>time_penalty</key>
			<integer>0</integer>
		</dict>
	</array>
</dict>
</plist>"#;

    #[test]
    fn decodes_sample_document() {
        let status = decode_game_status(SAMPLE).unwrap();
        assert_eq!(status.status_code, "ONGOING");
        assert_eq!(status.focus_team_id, Some(WireNumber::Integer(1)));
        assert_eq!(status.teams.len(), 1);

        let team = &status.teams[0];
        assert_eq!(team.id, WireNumber::Text("1".into()));
        assert_eq!(team.team_id(), Some(1));
        assert_eq!(team.name, "cc");
        assert_eq!(team.score, Some(WireNumber::Text("3".into())));
        assert_eq!(team.score_value(), 3);
        assert_eq!(team.has_finished, Some(WireFlag::Text("True".into())));
        assert!(team.finished());
        assert_eq!(
            team.found_treasures,
            vec![TreasureRef { id: 332225 }, TreasureRef { id: 332565 }]
        );
        assert_eq!(team.game_duration, Some(WireNumber::Integer(6)));
        assert_eq!(team.start_time.as_ref().and_then(WireNumber::as_i64), Some(1761639609000));
        assert_eq!(team.time_penalty, Some(WireNumber::Integer(0)));
        assert_eq!(team.is_in_game, Some(true));
        assert!(team.latitude.is_none());
        assert!(team.longitude.is_none());
    }

    #[test]
    fn encode_then_decode_is_idempotent() {
        let first = decode_game_status(SAMPLE).unwrap();
        let encoded = encode_game_status(&first).unwrap();
        let second = decode_game_status(&encoded).unwrap();
        assert_eq!(first, second);

        let again = decode_game_status(&encode_game_status(&second).unwrap()).unwrap();
        assert_eq!(second, again);
    }

    #[test]
    fn encode_preserves_wire_types() {
        let mut team = TeamInfo::new(WireNumber::Integer(4), "Ints");
        team.score = Some(WireNumber::Integer(10));
        team.score_adjustment = Some(WireNumber::Text("-2".into()));
        team.has_finished = Some(WireFlag::Boolean(false));
        team.latitude = Some("64.1".into());
        let status = GameStatus::new("FINISHED", None, vec![team]);

        let decoded = decode_game_status(&encode_game_status(&status).unwrap()).unwrap();
        assert_eq!(decoded, status);
        assert!(decoded.focus_team_id.is_none());
    }

    #[test]
    fn malformed_xml_is_plist_error() {
        let err = decode_game_status("<plist><dict><key>status_code</key>").unwrap_err();
        assert!(matches!(err, DecodeError::Plist(_)));
    }

    #[test]
    fn non_dictionary_root_is_rejected() {
        let doc = r#"<plist version="1.0"><array/></plist>"#;
        assert!(matches!(
            decode_game_status(doc).unwrap_err(),
            DecodeError::NotADictionary("root")
        ));
    }

    #[test]
    fn missing_status_code_is_rejected() {
        let doc = r#"<plist version="1.0"><dict><key>team_id</key><integer>1</integer></dict></plist>"#;
        assert!(matches!(
            decode_game_status(doc).unwrap_err(),
            DecodeError::MissingField("status_code")
        ));
    }

    #[test]
    fn wrongly_typed_teams_info_is_rejected() {
        let doc = r#"<plist version="1.0"><dict>
            <key>status_code</key><string>ONGOING</string>
            <key>teams_info</key><string>oops</string>
        </dict></plist>"#;
        assert!(matches!(
            decode_game_status(doc).unwrap_err(),
            DecodeError::InvalidField {
                field: "teams_info",
                ..
            }
        ));
    }

    #[test]
    fn team_without_readable_id_is_skipped() {
        let doc = r#"<plist version="1.0"><dict>
            <key>status_code</key><string>ONGOING</string>
            <key>teams_info</key><array>
                <dict><key>name</key><string>nameless</string></dict>
                <dict><key>id</key><real>2.5</real></dict>
                <string>not a team</string>
                <dict><key>id</key><integer>3</integer><key>name</key><string>kept</string></dict>
            </array>
        </dict></plist>"#;
        let status = decode_game_status(doc).unwrap();
        assert_eq!(status.teams.len(), 1);
        assert_eq!(status.teams[0].name, "kept");
    }

    #[test]
    fn mistyped_team_fields_degrade_to_absent() {
        let doc = r#"<plist version="1.0"><dict>
            <key>status_code</key><string>ONGOING</string>
            <key>team_id</key><real>1.0</real>
            <key>teams_info</key><array>
                <dict>
                    <key>id</key><string>1</string>
                    <key>score</key><string>3</string>
                    <key>has_finished</key><string>True</string>
                </dict>
                <dict>
                    <key>id</key><string>2</string>
                    <key>score</key><string>8</string>
                    <key>game_duration</key><real>6.5</real>
                    <key>is_in_game</key><string>yes</string>
                    <key>name</key><integer>7</integer>
                    <key>found_treasures</key><array>
                        <dict><key>id</key><integer>11</integer></dict>
                        <dict><key>id</key><date>2024-05-01T10:00:00Z</date></dict>
                    </array>
                    <key>challenge_penalty</key><string>none</string>
                    <key>latitude</key><integer>64</integer>
                </dict>
            </array>
        </dict></plist>"#;
        let status = decode_game_status(doc).unwrap();
        assert!(status.focus_team_id.is_none());
        assert_eq!(status.teams.len(), 2);

        let first = status.team(1).unwrap();
        assert_eq!(first.score_value(), 3);
        assert!(first.finished());

        let second = status.team(2).unwrap();
        assert_eq!(second.score_value(), 8);
        assert_eq!(second.game_duration, None);
        assert_eq!(second.is_in_game, None);
        assert_eq!(second.name, "");
        assert_eq!(second.found_treasures, vec![TreasureRef { id: 11 }]);
        assert!(second.challenge_penalty.is_empty());
        assert!(second.latitude.is_none());
    }

    #[test]
    fn missing_teams_info_decodes_as_empty() {
        let doc = r#"<plist version="1.0"><dict>
            <key>status_code</key><string>WAITING</string>
        </dict></plist>"#;
        let status = decode_game_status(doc).unwrap();
        assert!(status.teams.is_empty());
        assert!(status.focus_team_id.is_none());
    }
}
