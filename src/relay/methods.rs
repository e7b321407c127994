//! The closed set of operations a page may run
//!
//! Method names and argument lists arrive untyped from the page. They are
//! validated here, before anything touches the peer, into `PeerCall` and
//! `SessionCall`. Results are reduced to page-safe values on the way out.

use crate::error::{BridgeError, Result};
use crate::peer::{AnswerResult, OfferResult, RemotePeer, RemoteSession, SessionDescription, SessionOptions};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Positional argument reader for one call.
struct CallArgs {
    method: String,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl CallArgs {
    fn new(method: &str, values: Vec<Value>) -> Self {
        Self {
            method: method.to_string(),
            values: values.into_iter(),
            position: 0,
        }
    }

    fn next_value(&mut self) -> Option<Value> {
        self.position += 1;
        self.values.next().filter(|v| !v.is_null())
    }

    fn decode<T: DeserializeOwned>(&self, name: &str, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            BridgeError::invalid_request(format!(
                "{}: invalid argument {} ({}): {}",
                self.method, self.position, name, e
            ))
        })
    }

    fn required<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        match self.next_value() {
            Some(value) => self.decode(name, value),
            None => Err(BridgeError::invalid_request(format!(
                "{}: missing argument {} ({})",
                self.method, self.position, name
            ))),
        }
    }

    fn optional<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>> {
        match self.next_value() {
            Some(value) => self.decode(name, value).map(Some),
            None => Ok(None),
        }
    }

    /// Trailing `null`s (serialized `undefined`) are tolerated.
    fn finish(mut self) -> Result<()> {
        if self.values.any(|v| !v.is_null()) {
            return Err(BridgeError::invalid_request(format!(
                "{}: too many arguments",
                self.method
            )));
        }
        Ok(())
    }
}

/// A permitted peer operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    CreateOffer(Option<SessionOptions>),
    CreateExternalOffer(Option<SessionOptions>),
    AnswerOffer(SessionDescription, Option<SessionOptions>),
    AnswerExternalOffer(SessionDescription, Option<SessionOptions>),
    GetSession(String),
    GetAllMessages,
    GetMessagesOnChannel(String),
}

impl PeerCall {
    pub fn parse(method_name: &str, args: Vec<Value>) -> Result<Self> {
        let mut args = CallArgs::new(method_name, args);
        let call = match method_name {
            "createOffer" => PeerCall::CreateOffer(args.optional("options")?),
            "createExternalOffer" => PeerCall::CreateExternalOffer(args.optional("options")?),
            "answerOffer" => PeerCall::AnswerOffer(args.required("offer")?, args.optional("options")?),
            "answerExternalOffer" => {
                PeerCall::AnswerExternalOffer(args.required("offer")?, args.optional("options")?)
            }
            "getSession" => PeerCall::GetSession(args.required("sessionId")?),
            "getAllMessages" => PeerCall::GetAllMessages,
            "getMessagesOnChannel" => PeerCall::GetMessagesOnChannel(args.required("channelName")?),
            other => {
                return Err(BridgeError::invalid_request(format!("unknown peer method {:?}", other)))
            }
        };
        args.finish()?;
        Ok(call)
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            PeerCall::CreateOffer(_) => "createOffer",
            PeerCall::CreateExternalOffer(_) => "createExternalOffer",
            PeerCall::AnswerOffer(..) => "answerOffer",
            PeerCall::AnswerExternalOffer(..) => "answerExternalOffer",
            PeerCall::GetSession(_) => "getSession",
            PeerCall::GetAllMessages => "getAllMessages",
            PeerCall::GetMessagesOnChannel(_) => "getMessagesOnChannel",
        }
    }

    pub async fn invoke(&self, peer: &RemotePeer) -> Result<PeerOutcome> {
        Ok(match self {
            PeerCall::CreateOffer(options) => PeerOutcome::Offer(peer.create_offer(options.clone()).await?),
            PeerCall::CreateExternalOffer(options) => {
                PeerOutcome::Offer(peer.create_external_offer(options.clone()).await?)
            }
            PeerCall::AnswerOffer(offer, options) => {
                PeerOutcome::Answer(peer.answer_offer(offer.clone(), options.clone()).await?)
            }
            PeerCall::AnswerExternalOffer(offer, options) => {
                PeerOutcome::Answer(peer.answer_external_offer(offer.clone(), options.clone()).await?)
            }
            PeerCall::GetSession(session_id) => PeerOutcome::Session(peer.get_session(session_id)),
            PeerCall::GetAllMessages => PeerOutcome::Messages(peer.get_all_messages().await?),
            PeerCall::GetMessagesOnChannel(channel) => {
                PeerOutcome::Messages(peer.get_messages_on_channel(channel).await?)
            }
        })
    }
}

/// A permitted session operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMethod {
    CreateOffer(Option<SessionOptions>),
    CompleteOffer(SessionDescription),
    AnswerOffer(SessionDescription, Option<SessionOptions>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionCall {
    pub session_id: String,
    pub method: SessionMethod,
}

impl SessionCall {
    pub fn parse(session_id: String, method_name: &str, args: Vec<Value>) -> Result<Self> {
        let mut args = CallArgs::new(method_name, args);
        let method = match method_name {
            "createOffer" => SessionMethod::CreateOffer(args.optional("options")?),
            "completeOffer" => SessionMethod::CompleteOffer(args.required("answer")?),
            "answerOffer" => SessionMethod::AnswerOffer(args.required("offer")?, args.optional("options")?),
            other => {
                return Err(BridgeError::invalid_request(format!(
                    "unknown session method {:?}",
                    other
                )))
            }
        };
        args.finish()?;
        Ok(Self { session_id, method })
    }

    pub fn method_name(&self) -> &'static str {
        match self.method {
            SessionMethod::CreateOffer(_) => "createOffer",
            SessionMethod::CompleteOffer(_) => "completeOffer",
            SessionMethod::AnswerOffer(..) => "answerOffer",
        }
    }

    pub async fn invoke(&self, peer: &RemotePeer) -> Result<SessionOutcome> {
        let session = peer.get_session(&self.session_id);
        Ok(match &self.method {
            SessionMethod::CreateOffer(options) => {
                SessionOutcome::Description(session.create_offer(options.clone()).await?)
            }
            SessionMethod::CompleteOffer(answer) => {
                session.complete_offer(answer.clone()).await?;
                SessionOutcome::Completed
            }
            SessionMethod::AnswerOffer(offer, options) => {
                SessionOutcome::Description(session.answer_offer(offer.clone(), options.clone()).await?)
            }
        })
    }
}

/// A validated page request.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayRequest {
    Peer(PeerCall),
    Session(SessionCall),
}

impl RelayRequest {
    pub fn target(&self) -> &'static str {
        match self {
            RelayRequest::Peer(_) => "peer",
            RelayRequest::Session(_) => "session",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RelayRequest::Peer(call) => format!("peer.{}", call.method_name()),
            RelayRequest::Session(call) => format!("session[{}].{}", call.session_id, call.method_name()),
        }
    }

    pub async fn invoke(&self, peer: &RemotePeer) -> Result<RelayOutcome> {
        match self {
            RelayRequest::Peer(call) => call.invoke(peer).await.map(RelayOutcome::Peer),
            RelayRequest::Session(call) => call.invoke(peer).await.map(RelayOutcome::Session),
        }
    }
}

/// Result of a peer operation, still holding admin capabilities.
#[derive(Debug)]
pub enum PeerOutcome {
    Offer(OfferResult),
    Answer(AnswerResult),
    Session(RemoteSession),
    Messages(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Description(SessionDescription),
    Completed,
}

#[derive(Debug)]
pub enum RelayOutcome {
    Peer(PeerOutcome),
    Session(SessionOutcome),
}

fn page_session(session: &RemoteSession) -> Value {
    json!({ "sessionId": session.session_id() })
}

impl PeerOutcome {
    /// Sessions are reduced to their id and `setAnswer` is dropped: a page
    /// holding the admin client could reconfigure the mock session.
    pub fn into_page_value(self) -> Value {
        match self {
            PeerOutcome::Offer(result) => json!({
                "offer": result.offer,
                "session": page_session(&result.session),
            }),
            PeerOutcome::Answer(result) => json!({
                "answer": result.answer,
                "session": page_session(&result.session),
            }),
            PeerOutcome::Session(session) => page_session(&session),
            PeerOutcome::Messages(messages) => Value::Array(messages),
        }
    }
}

impl SessionOutcome {
    pub fn into_page_value(self) -> Value {
        match self {
            SessionOutcome::Description(description) => json!(description),
            SessionOutcome::Completed => Value::Null,
        }
    }
}

impl RelayOutcome {
    pub fn into_page_value(self) -> Value {
        match self {
            RelayOutcome::Peer(outcome) => outcome.into_page_value(),
            RelayOutcome::Session(outcome) => outcome.into_page_value(),
        }
    }
}
