use std::net::IpAddr;
use serde_bencode::value::Value;
use serde_derive::Serialize;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {

    pub status: u16,

    // Bencoded.
    pub body: Vec<u8>,

}

// Answers a single announce request line.
pub trait AnnounceHandler {

    fn announce(&self, request: &str, host: IpAddr) -> AnnounceResponse;

}

impl<F> AnnounceHandler for F
where
    F: Fn(&str, IpAddr) -> AnnounceResponse,
{
    fn announce(&self, request: &str, host: IpAddr) -> AnnounceResponse {
        self(request, host)
    }
}

#[derive(Serialize)]
struct FailureMessage<'a> {

    #[serde(rename = "failure reason")]
    failure_reason: &'a str,

}

// Bencoded `{"failure reason": reason}` with a 400 status.
pub fn failure_response(reason: &str) -> AnnounceResponse {
    match serde_bencode::to_bytes(&FailureMessage { failure_reason: reason }) {
        Ok(body) => AnnounceResponse { status: STATUS_BAD_REQUEST, body },
        Err(e) => {
            tracing::warn!("could not craft tracker error message: {}", e);
            AnnounceResponse { status: STATUS_INTERNAL_SERVER_ERROR, body: Vec::new() }
        },
    }
}

// Several announces in one request body, one per line.
pub struct MultiAnnounce<H> {

    handler: H,

}

impl<H: AnnounceHandler> MultiAnnounce<H> {

    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    // Answers with the list of every decodable sub-response. The batch counts
    // as a success if any single announce did.
    pub fn process(&self, body: &str, host: IpAddr) -> AnnounceResponse {
        let mut responses = Vec::new();
        let mut any_success = false;

        for request in body.lines() {
            let response = self.handler.announce(request, host);
            any_success |= response.status == STATUS_OK;
            match serde_bencode::from_bytes::<Value>(&response.body) {
                Ok(value) => responses.push(value),
                Err(e) => tracing::warn!("cannot decode announce response: {}", e),
            }
        }

        if responses.is_empty() {
            return failure_response("");
        }

        match serde_bencode::to_bytes(&Value::List(responses)) {
            Ok(body) => AnnounceResponse {
                status: if any_success { STATUS_OK } else { STATUS_BAD_REQUEST },
                body,
            },
            Err(e) => {
                tracing::error!("cannot encode multi announce response: {}", e);
                AnnounceResponse { status: STATUS_INTERNAL_SERVER_ERROR, body: Vec::new() }
            },
        }
    }
}
