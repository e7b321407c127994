//! GraphQL documents for the MockRTC admin API

pub const CREATE_OFFER: &str = r#"
    mutation CreatePeerOffer($peerId: ID!, $options: Raw) {
        createOffer(peerId: $peerId, options: $options) {
            id
            description { type, sdp }
        }
    }
"#;

pub const CREATE_EXTERNAL_OFFER: &str = r#"
    mutation CreateExternalPeerOffer($peerId: ID!, $options: Raw) {
        createExternalOffer(peerId: $peerId, options: $options) {
            id
            description { type, sdp }
        }
    }
"#;

pub const ANSWER_OFFER: &str = r#"
    mutation AnswerPeerOffer($peerId: ID!, $offer: SessionDescriptionInput!, $options: Raw) {
        answerOffer(peerId: $peerId, offer: $offer, options: $options) {
            id
            description { type, sdp }
        }
    }
"#;

pub const ANSWER_EXTERNAL_OFFER: &str = r#"
    mutation AnswerExternalPeerOffer($peerId: ID!, $offer: SessionDescriptionInput!, $options: Raw) {
        answerExternalOffer(peerId: $peerId, offer: $offer, options: $options) {
            id
            description { type, sdp }
        }
    }
"#;

pub const GET_ALL_MESSAGES: &str = r#"
    query GetPeerMessages($peerId: ID!) {
        getSeenMessages(peerId: $peerId)
    }
"#;

pub const GET_CHANNEL_MESSAGES: &str = r#"
    query GetPeerChannelMessages($peerId: ID!, $channelName: String!) {
        getSeenMessages(peerId: $peerId, channelName: $channelName)
    }
"#;

pub const SESSION_CREATE_OFFER: &str = r#"
    mutation CreateSessionOffer($sessionId: ID!, $options: Raw) {
        createOffer(sessionId: $sessionId, options: $options) { type, sdp }
    }
"#;

pub const SESSION_COMPLETE_OFFER: &str = r#"
    mutation CompleteSessionOffer($sessionId: ID!, $answer: SessionDescriptionInput!) {
        completeOffer(sessionId: $sessionId, answer: $answer)
    }
"#;

pub const SESSION_ANSWER_OFFER: &str = r#"
    mutation AnswerSessionOffer($sessionId: ID!, $offer: SessionDescriptionInput!, $options: Raw) {
        answerOffer(sessionId: $sessionId, offer: $offer, options: $options) { type, sdp }
    }
"#;
