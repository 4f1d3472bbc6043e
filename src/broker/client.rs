//! Request/reply client for the load-balancing broker
//!
//! Strict lockstep: one frame out, one frame back.

use crate::core::model::{AllocationResult, Confirmation, ConfirmationVerb, Request};
use crate::net::{read_frame, write_frame};
use crate::protocol::Message;
use crate::{AllocError, Result};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

pub struct BrokerClient {
    stream: TcpStream,
    reply_timeout: Duration,
}

impl BrokerClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A, reply_timeout: Duration) -> Result<Self> {
        let stream = timeout(reply_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| AllocError::Transport("connect timed out".to_string()))??;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            stream,
            reply_timeout,
        })
    }

    /// Send a request and wait for its result
    pub async fn request(&mut self, request: &Request) -> Result<AllocationResult> {
        match self.round_trip(&Message::Request(request.clone())).await? {
            Message::Result(result) => Ok(result),
            other => Err(AllocError::Transport(format!(
                "expected result, got {}",
                other.kind()
            ))),
        }
    }

    /// Accept or reject a result; returns the broker's acknowledgement text
    pub async fn confirm(
        &mut self,
        request: &Request,
        result: &AllocationResult,
        accept: bool,
    ) -> Result<String> {
        let verb = if accept {
            ConfirmationVerb::Accept
        } else {
            ConfirmationVerb::Reject
        };
        let confirmation = Confirmation::new(verb, request.program.clone(), result.clone());

        match self.round_trip(&Message::Confirmation(confirmation)).await? {
            Message::Ack(verb) => Ok(verb.ack().to_string()),
            other => Err(AllocError::Transport(format!(
                "expected acknowledgement, got {}",
                other.kind()
            ))),
        }
    }

    async fn round_trip(&mut self, message: &Message) -> Result<Message> {
        write_frame(&mut self.stream, &message.encode()?).await?;

        let reply = timeout(self.reply_timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| AllocError::Transport("no reply from broker".to_string()))??;

        match reply {
            Some(payload) => Ok(Message::decode(&payload)?),
            None => Err(AllocError::Transport("broker closed the connection".to_string())),
        }
    }
}
