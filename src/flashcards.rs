//! AnkiConnect client.
//!
//! Every call is a `POST` of `{action, version, params}` to the AnkiConnect
//! endpoint, answered with `{result, error}`. A non-null `error` fails the
//! whole call with [`StudyError::FlashcardStore`]. The tool layer turns
//! those errors into `{ "success": false, ... }` values for the agent.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::FlashcardsConfig;
use crate::error::{StudyError, StudyResult};

/// A note as stored in a deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    #[serde(rename = "noteId")]
    pub note_id: i64,
    pub front: String,
    pub back: String,
}

/// Question/answer pair to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDraft {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddCardOutcome {
    Added { note_id: i64 },
    /// The store already holds a note with this front.
    Duplicate,
}

/// Per-card result of [`AnkiClient::add_cards`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub deck: String,
    pub added: usize,
    pub duplicates: usize,
    pub failed: Vec<String>,
}

pub struct AnkiClient {
    url: String,
    version: u32,
    note_model: String,
    client: reqwest::Client,
}

impl AnkiClient {
    pub fn new(config: &FlashcardsConfig) -> StudyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StudyError::FlashcardStore(e.to_string()))?;
        Ok(Self {
            url: config.url.clone(),
            version: config.version,
            note_model: config.note_model.clone(),
            client,
        })
    }

    async fn request(&self, action: &str, params: Option<Value>) -> StudyResult<Value> {
        let mut payload = json!({ "action": action, "version": self.version });
        if let Some(params) = params {
            payload["params"] = params;
        }
        debug!(action, "anki request");

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StudyError::FlashcardStore(format!("AnkiConnect unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(StudyError::FlashcardStore(format!(
                "AnkiConnect returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| StudyError::FlashcardStore(format!("invalid AnkiConnect response: {}", e)))?;

        match body.get("error") {
            Some(Value::Null) | None => Ok(body.get("result").cloned().unwrap_or(Value::Null)),
            Some(Value::String(msg)) => Err(StudyError::FlashcardStore(msg.clone())),
            Some(other) => Err(StudyError::FlashcardStore(other.to_string())),
        }
    }

    /// All deck names, including `Parent::Child` subdecks.
    pub async fn deck_names(&self) -> StudyResult<Vec<String>> {
        let result = self.request("deckNames", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Create `name`; creating an existing deck succeeds.
    pub async fn create_deck(&self, name: &str) -> StudyResult<()> {
        self.request("createDeck", Some(json!({ "deck": name })))
            .await?;
        Ok(())
    }

    /// Front/back/id of every note in `deck`.
    pub async fn list_cards(&self, deck: &str) -> StudyResult<Vec<Card>> {
        let query = format!("deck:\"{}\"", deck.replace('"', "\\\""));
        let ids = self
            .request("findNotes", Some(json!({ "query": query })))
            .await?;
        if ids.as_array().map(Vec::is_empty).unwrap_or(true) {
            return Ok(Vec::new());
        }

        let notes = self
            .request("notesInfo", Some(json!({ "notes": ids })))
            .await?;
        let notes = notes.as_array().cloned().unwrap_or_default();

        Ok(notes
            .iter()
            .map(|n| Card {
                note_id: n.get("noteId").and_then(Value::as_i64).unwrap_or_default(),
                front: field_value(n, "Front"),
                back: field_value(n, "Back"),
            })
            .collect())
    }

    /// Add one note to an existing deck, refusing exact duplicates.
    pub async fn add_card(&self, deck: &str, front: &str, back: &str) -> StudyResult<AddCardOutcome> {
        let params = json!({
            "note": {
                "deckName": deck,
                "modelName": self.note_model,
                "fields": { "Front": front, "Back": back },
                "options": { "allowDuplicate": false },
                "tags": [],
            }
        });

        match self.request("addNote", Some(params)).await {
            Ok(id) => Ok(AddCardOutcome::Added {
                note_id: id.as_i64().unwrap_or_default(),
            }),
            Err(StudyError::FlashcardStore(msg)) if msg.to_lowercase().contains("duplicate") => {
                Ok(AddCardOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    /// Create `"<parent>::<topic>"` and add each card to it.
    ///
    /// Failing to create the deck fails the batch; individual card
    /// failures are collected in the report.
    pub async fn add_cards(
        &self,
        parent: &str,
        topic: &str,
        cards: &[CardDraft],
    ) -> StudyResult<BatchReport> {
        let deck = format!("{}::{}", parent, topic);
        self.create_deck(&deck).await?;

        let mut report = BatchReport {
            deck: deck.clone(),
            ..BatchReport::default()
        };
        for card in cards {
            match self.add_card(&deck, &card.front, &card.back).await {
                Ok(AddCardOutcome::Added { .. }) => report.added += 1,
                Ok(AddCardOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => report.failed.push(format!("{}: {}", card.front, e)),
            }
        }
        Ok(report)
    }
}

fn field_value(note: &Value, field: &str) -> String {
    note.pointer(&format!("/fields/{}/value", field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> AnkiClient {
        AnkiClient::new(&FlashcardsConfig {
            url: server.uri(),
            ..FlashcardsConfig::default()
        })
        .unwrap()
    }

    fn ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": result, "error": null }))
    }

    fn err(msg: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": null, "error": msg }))
    }

    #[tokio::test]
    async fn deck_names_sends_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "deckNames", "version": 6 })))
            .respond_with(ok(json!(["Default", "Maths::Groups"])))
            .expect(1)
            .mount(&server)
            .await;

        let decks = client_for(&server).await.deck_names().await.unwrap();
        assert_eq!(decks, vec!["Default", "Maths::Groups"]);
    }

    #[tokio::test]
    async fn error_field_fails_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(err("collection is not available"))
            .mount(&server)
            .await;

        let e = client_for(&server).await.deck_names().await.unwrap_err();
        assert!(matches!(e, StudyError::FlashcardStore(ref m) if m.contains("not available")));
    }

    #[tokio::test]
    async fn list_cards_maps_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "findNotes" })))
            .respond_with(ok(json!([11, 12])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "notesInfo", "params": { "notes": [11, 12] } })))
            .respond_with(ok(json!([
                { "noteId": 11, "fields": { "Front": { "value": "Q1", "order": 0 }, "Back": { "value": "A1", "order": 1 } } },
                { "noteId": 12, "fields": { "Front": { "value": "Q2", "order": 0 }, "Back": { "value": "A2", "order": 1 } } }
            ])))
            .mount(&server)
            .await;

        let cards = client_for(&server).await.list_cards("Maths").await.unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].front, "Q2");
        assert_eq!(cards[1].note_id, 12);
    }

    #[tokio::test]
    async fn empty_deck_skips_notes_info() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "findNotes" })))
            .respond_with(ok(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let cards = client_for(&server).await.list_cards("Empty").await.unwrap();
        assert!(cards.is_empty());
    }

    #[tokio::test]
    async fn duplicate_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "addNote" })))
            .respond_with(err("cannot create note because it is a duplicate"))
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .await
            .add_card("Maths", "Q", "A")
            .await
            .unwrap();
        assert_eq!(outcome, AddCardOutcome::Duplicate);
    }

    #[tokio::test]
    async fn add_cards_creates_subdeck_and_reports() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "createDeck", "params": { "deck": "Maths::Groups" } })))
            .respond_with(ok(json!(1)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "addNote", "params": { "note": { "fields": { "Front": "dup" } } } })))
            .respond_with(err("duplicate"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "action": "addNote", "params": { "note": { "deckName": "Maths::Groups" } } })))
            .respond_with(ok(json!(99)))
            .mount(&server)
            .await;

        let cards = vec![
            CardDraft { front: "What is a group?".into(), back: "A set with an operation".into() },
            CardDraft { front: "dup".into(), back: "x".into() },
        ];
        let report = client_for(&server)
            .await
            .add_cards("Maths", "Groups", &cards)
            .await
            .unwrap();
        assert_eq!(report.deck, "Maths::Groups");
        assert_eq!(report.added, 1);
        assert_eq!(report.duplicates, 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_is_flashcard_error() {
        let client = AnkiClient::new(&FlashcardsConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..FlashcardsConfig::default()
        })
        .unwrap();
        let e = client.deck_names().await.unwrap_err();
        assert!(matches!(e, StudyError::FlashcardStore(_)));
    }
}
