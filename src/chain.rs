//! Aggregate-close composition of heterogeneous closable resources.
//!
//! A response body typically sits on top of several things that must be
//! released when the caller is done: decompressor state, the write half of
//! the socket, an HTTP/2 session driver. `ResourceChain` composes them into
//! one unit whose close visits every member, continues past individual
//! failures, and reports all of them together.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// A single closable resource owned by a response body.
#[async_trait]
pub trait Resource: Send {
    /// Release the resource. Called at most once by the chain.
    async fn close(&mut self) -> Result<()>;
}

/// Ordered list of resources closed as one unit.
///
/// `close` is idempotent: members are drained on the first call, so later
/// calls are no-ops returning `Ok` rather than re-reporting old failures.
#[derive(Default)]
pub struct ResourceChain {
    resources: Vec<Box<dyn Resource>>,
}

impl ResourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource. Members are closed in insertion order.
    pub fn push(&mut self, resource: Box<dyn Resource>) {
        self.resources.push(resource);
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Close every member, aggregating failures instead of stopping at the
    /// first one. A failed member never prevents later members from being
    /// visited, so nothing leaks behind an earlier close error.
    pub async fn close(&mut self) -> Result<()> {
        let mut failure: Option<Error> = None;
        for mut resource in self.resources.drain(..) {
            if let Err(e) = resource.close().await {
                failure = Some(match failure {
                    Some(earlier) => earlier.join(e),
                    None => e,
                });
            }
        }
        match failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ResourceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceChain")
            .field("resources", &self.resources.len())
            .finish()
    }
}
