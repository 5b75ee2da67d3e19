//! Single-exchange RFC services: Echo (862), Daytime (867), Time (868) and
//! Finger (1288).
//!
//! None of them greet, negotiate or authenticate. Daytime and Finger frame
//! their response by closing the connection, so a clean close after data is
//! the frame boundary; a close before any byte is still
//! [`ProbeError::TransportClosed`].

use crate::catalog::{Payload, Request};
use crate::error::{constants, ProbeError, Result};
use crate::protocol::session::PhaseIo;
use crate::transport::Transport;
use serde::Serialize;

/// Seconds between 1900-01-01 and 1970-01-01
pub const EPOCH_OFFSET: u64 = 2_208_988_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleService {
    Echo,
    Daytime,
    Time,
    Finger,
}

impl SimpleService {
    pub fn name(self) -> &'static str {
        match self {
            SimpleService::Echo => "echo",
            SimpleService::Daytime => "daytime",
            SimpleService::Time => "time",
            SimpleService::Finger => "finger",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            SimpleService::Echo => 7,
            SimpleService::Daytime => 13,
            SimpleService::Time => 37,
            SimpleService::Finger => 79,
        }
    }
}

/// RFC 868 time, raw and as Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeValue {
    pub seconds_since_1900: u32,
    /// Negative for instants before 1970
    pub unix_seconds: i64,
}

impl TimeValue {
    pub fn from_wire(raw: [u8; 4]) -> Self {
        let seconds_since_1900 = u32::from_be_bytes(raw);
        Self {
            seconds_since_1900,
            unix_seconds: seconds_since_1900 as i64 - EPOCH_OFFSET as i64,
        }
    }
}

pub struct SimpleCatalog {
    service: SimpleService,
}

impl SimpleCatalog {
    pub fn new(service: SimpleService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> SimpleService {
        self.service
    }

    pub(crate) async fn greet<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        io.note(&format!("{} has no greeting", self.service.name()));
        Ok(())
    }

    pub(crate) async fn exchange<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
        request: &Request,
    ) -> Result<Payload> {
        match (self.service, request) {
            (SimpleService::Echo, Request::Text(line)) => {
                io.send(line.as_bytes(), "echo line").await?;
                let echoed = io.read_exact(line.len(), "echo reply").await?;
                if echoed != line.as_bytes() {
                    return Err(ProbeError::Protocol(
                        "echo reply differs from what was sent".into(),
                    ));
                }
                Ok(Payload::Text(line.clone()))
            }
            (SimpleService::Daytime, Request::Fetch) => {
                let body = io.read_to_close("daytime string").await?;
                Ok(Payload::Text(String::from_utf8_lossy(&body).trim_end().to_string()))
            }
            (SimpleService::Time, Request::Fetch) => {
                let body = io.read_exact(4, "time value").await?;
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&body);
                Ok(Payload::Time(TimeValue::from_wire(raw)))
            }
            (SimpleService::Finger, Request::Text(query)) => {
                io.send(format!("{query}\r\n").as_bytes(), "finger query")
                    .await?;
                let body = io.read_to_close("finger reply").await?;
                Ok(Payload::Text(String::from_utf8_lossy(&body).trim_end().to_string()))
            }
            (service, request) => Err(ProbeError::Protocol(format!(
                "{}: {} does not take {request:?}",
                constants::ERR_REQUEST_NOT_SUPPORTED,
                service.name()
            ))),
        }
    }
}
