//! Remote MockRTC peer and session handles
//!
//! Both are thin wrappers binding an id to an admin transport. Every
//! operation is a single admin query; nothing is cached locally.

mod queries;

use crate::admin::{AdminQuery, AdminTransport};
use crate::error::{BridgeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// SDP message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An `RTCSessionDescriptionInit`-shaped description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    #[serde(default)]
    pub sdp: String,
}

/// Options accepted when creating or answering an offer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionOptions {
    #[serde(rename = "mirrorSDP", default, skip_serializing_if = "Option::is_none")]
    pub mirror_sdp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_data_channel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    id: String,
    description: SessionDescription,
}

fn field<T: DeserializeOwned>(mut data: Value, name: &str) -> Result<T> {
    let value = data.get_mut(name).map(Value::take).unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| BridgeError::AdminUnavailable(format!("malformed {} response: {}", name, e)))
}

/// A session owned by a remote peer.
#[derive(Clone)]
pub struct RemoteSession {
    session_id: String,
    transport: Arc<dyn AdminTransport>,
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl RemoteSession {
    pub fn new(session_id: impl Into<String>, transport: Arc<dyn AdminTransport>) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Create an offer to renegotiate this session.
    pub async fn create_offer(&self, options: Option<SessionOptions>) -> Result<SessionDescription> {
        AdminQuery::new(
            queries::SESSION_CREATE_OFFER,
            json!({ "sessionId": self.session_id, "options": options }),
        )
        .map_response(|data| field(data, "createOffer"))
        .send(self.transport.as_ref())
        .await
    }

    /// Complete a previously created offer with the remote answer.
    pub async fn complete_offer(&self, answer: SessionDescription) -> Result<()> {
        AdminQuery::new(
            queries::SESSION_COMPLETE_OFFER,
            json!({ "sessionId": self.session_id, "answer": answer }),
        )
        .send(self.transport.as_ref())
        .await
        .map(|_| ())
    }

    /// Answer a renegotiation offer from the remote side.
    pub async fn answer_offer(
        &self,
        offer: SessionDescription,
        options: Option<SessionOptions>,
    ) -> Result<SessionDescription> {
        AdminQuery::new(
            queries::SESSION_ANSWER_OFFER,
            json!({ "sessionId": self.session_id, "offer": offer, "options": options }),
        )
        .map_response(|data| field(data, "answerOffer"))
        .send(self.transport.as_ref())
        .await
    }
}

/// Result of creating an offer: the SDP plus the session that owns it.
#[derive(Debug, Clone)]
pub struct OfferResult {
    pub offer: SessionDescription,
    pub session: RemoteSession,
}

impl OfferResult {
    /// Complete the offer with the other side's answer.
    pub async fn set_answer(&self, answer: SessionDescription) -> Result<()> {
        self.session.complete_offer(answer).await
    }
}

/// Result of answering an offer.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub answer: SessionDescription,
    pub session: RemoteSession,
}

/// A mocked WebRTC endpoint on the admin server.
pub struct RemotePeer {
    peer_id: String,
    transport: Arc<dyn AdminTransport>,
}

impl fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotePeer")
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

impl RemotePeer {
    pub fn new(peer_id: impl Into<String>, transport: Arc<dyn AdminTransport>) -> Self {
        Self {
            peer_id: peer_id.into(),
            transport,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Look up a session by id. No request is made; an unknown id only
    /// fails once the session is used.
    pub fn get_session(&self, session_id: &str) -> RemoteSession {
        RemoteSession::new(session_id, self.transport.clone())
    }

    pub async fn create_offer(&self, options: Option<SessionOptions>) -> Result<OfferResult> {
        self.offer_query(queries::CREATE_OFFER, "createOffer", options).await
    }

    pub async fn create_external_offer(&self, options: Option<SessionOptions>) -> Result<OfferResult> {
        self.offer_query(queries::CREATE_EXTERNAL_OFFER, "createExternalOffer", options)
            .await
    }

    pub async fn answer_offer(
        &self,
        offer: SessionDescription,
        options: Option<SessionOptions>,
    ) -> Result<AnswerResult> {
        self.answer_query(queries::ANSWER_OFFER, "answerOffer", offer, options)
            .await
    }

    pub async fn answer_external_offer(
        &self,
        offer: SessionDescription,
        options: Option<SessionOptions>,
    ) -> Result<AnswerResult> {
        self.answer_query(queries::ANSWER_EXTERNAL_OFFER, "answerExternalOffer", offer, options)
            .await
    }

    pub async fn get_all_messages(&self) -> Result<Vec<Value>> {
        AdminQuery::new(queries::GET_ALL_MESSAGES, json!({ "peerId": self.peer_id }))
            .map_response(|data| field(data, "getSeenMessages"))
            .send(self.transport.as_ref())
            .await
    }

    pub async fn get_messages_on_channel(&self, channel_name: &str) -> Result<Vec<Value>> {
        AdminQuery::new(
            queries::GET_CHANNEL_MESSAGES,
            json!({ "peerId": self.peer_id, "channelName": channel_name }),
        )
        .map_response(|data| field(data, "getSeenMessages"))
        .send(self.transport.as_ref())
        .await
    }

    async fn offer_query(
        &self,
        query: &'static str,
        name: &'static str,
        options: Option<SessionOptions>,
    ) -> Result<OfferResult> {
        let created: SessionCreated =
            AdminQuery::new(query, json!({ "peerId": self.peer_id, "options": options }))
                .map_response(move |data| field(data, name))
                .send(self.transport.as_ref())
                .await?;
        Ok(OfferResult {
            offer: created.description,
            session: self.get_session(&created.id),
        })
    }

    async fn answer_query(
        &self,
        query: &'static str,
        name: &'static str,
        offer: SessionDescription,
        options: Option<SessionOptions>,
    ) -> Result<AnswerResult> {
        let created: SessionCreated = AdminQuery::new(
            query,
            json!({ "peerId": self.peer_id, "offer": offer, "options": options }),
        )
        .map_response(move |data| field(data, name))
        .send(self.transport.as_ref())
        .await?;
        Ok(AnswerResult {
            answer: created.description,
            session: self.get_session(&created.id),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{offer_reply, FakeTransport};
    use super::*;

    #[tokio::test]
    async fn test_create_offer_builds_session() {
        let transport = FakeTransport::new(|query, _| {
            assert!(query.contains("createOffer(peerId"));
            Ok(json!({ "createOffer": offer_reply("s1") }))
        });
        let peer = RemotePeer::new("p1", transport.clone());

        let result = peer.create_offer(None).await.unwrap();
        assert_eq!(result.offer.kind, SdpType::Offer);
        assert_eq!(result.session.session_id(), "s1");
        assert_eq!(transport.last_variables().unwrap()["peerId"], "p1");
    }

    #[tokio::test]
    async fn test_set_answer_completes_on_owning_session() {
        let transport = FakeTransport::new(|query, _| {
            if query.contains("completeOffer") {
                Ok(json!({ "completeOffer": null }))
            } else {
                Ok(json!({ "createOffer": offer_reply("s9") }))
            }
        });
        let peer = RemotePeer::new("p1", transport.clone());
        let result = peer.create_offer(None).await.unwrap();

        let answer = SessionDescription {
            kind: SdpType::Answer,
            sdp: "v=0\r\n".to_string(),
        };
        result.set_answer(answer).await.unwrap();
        let vars = transport.last_variables().unwrap();
        assert_eq!(vars["sessionId"], "s9");
        assert_eq!(vars["answer"]["type"], "answer");
    }

    #[tokio::test]
    async fn test_get_session_is_local() {
        let transport = FakeTransport::new(|_, _| Ok(Value::Null));
        let peer = RemotePeer::new("p1", transport.clone());
        let session = peer.get_session("s1");
        assert_eq!(session.session_id(), "s1");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_recoverable() {
        let transport = FakeTransport::new(|_, _| Ok(json!({ "createOffer": { "id": 3 } })));
        let peer = RemotePeer::new("p1", transport);
        let err = peer.create_offer(None).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_options_reject_unknown_keys() {
        let parsed: std::result::Result<SessionOptions, _> =
            serde_json::from_value(json!({ "mirrorSDP": true, "evil": 1 }));
        assert!(parsed.is_err());

        let parsed: SessionOptions =
            serde_json::from_value(json!({ "mirrorSDP": true, "addDataChannel": false })).unwrap();
        assert_eq!(parsed.mirror_sdp, Some(true));
        assert_eq!(parsed.add_data_channel, Some(false));
    }
}
