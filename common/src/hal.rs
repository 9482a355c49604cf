//! Seams between the node controller and the board.
//!
//! The ESP target implements these over ESP-IDF drivers, the host build over
//! simulated parts, and the controller tests over in-memory fakes.

use crate::{
    error::NodeError,
    types::{HttpMethod, HttpResponse},
};

pub trait Network {
    /// Starts the station join. Completion is observed through `is_connected`.
    fn begin(&mut self) -> Result<(), NodeError>;

    fn is_connected(&mut self) -> bool;

    /// Fire-and-forget: the outcome shows up on a later `is_connected`.
    fn reconnect(&mut self);

    fn ip_address(&mut self) -> Option<String> {
        None
    }
}

/// A character display addressed by whole lines.
pub trait Display {
    fn clear(&mut self) -> Result<(), NodeError>;

    /// Overwrites `row` starting at column 0.
    fn write_line(&mut self, row: u8, text: &str) -> Result<(), NodeError>;

    fn columns(&self) -> usize {
        16
    }
}

/// A panel that failed to come up. Writes fail and the controller carries on without it.
impl<D: Display> Display for Option<D> {
    fn clear(&mut self) -> Result<(), NodeError> {
        match self {
            Some(display) => display.clear(),
            None => Err(NodeError::Display("no display attached".to_string())),
        }
    }

    fn write_line(&mut self, row: u8, text: &str) -> Result<(), NodeError> {
        match self {
            Some(display) => display.write_line(row, text),
            None => Err(NodeError::Display("no display attached".to_string())),
        }
    }

    fn columns(&self) -> usize {
        self.as_ref().map_or(16, |display| display.columns())
    }
}

pub trait TemperatureSensor {
    /// Triggers a conversion and returns the first sensor's reading in Celsius.
    fn read_celsius(&mut self) -> Result<f32, NodeError>;
}

pub trait OutputPin {
    fn set_level(&mut self, high: bool) -> Result<(), NodeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: Option<&'a [u8]>,
}

pub trait HttpTransport {
    /// Performs one complete exchange. The connection is released before returning.
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, NodeError>;
}

pub trait Delay {
    fn delay_ms(&mut self, ms: u64);
}
