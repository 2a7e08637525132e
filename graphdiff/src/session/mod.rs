//! Graph session adapters.
//!
//! A session is one connection to one graph endpoint. The comparator owns one
//! session per side and never shares it between concurrently issued queries;
//! the `&mut self` receiver on [`GraphSession::run_query`] enforces that.

pub mod memory;
pub mod neo4j;

use std::fmt;

use serde::Serialize;

use crate::{
    errors::SessionError,
    query::{GraphQuery, Row},
};

pub use memory::{MemoryGraph, QueryLog};
pub use neo4j::Neo4jSession;

#[allow(async_fn_in_trait)]
pub trait GraphSession {
    /// Execute one query and collect every row it returns.
    async fn run_query(&mut self, query: &GraphQuery) -> Result<Vec<Row>, SessionError>;

    /// Release the underlying connection.
    async fn close(self)
    where
        Self: Sized;
}

impl<S> GraphSession for &mut S
where
    S: GraphSession,
{
    async fn run_query(&mut self, query: &GraphQuery) -> Result<Vec<Row>, SessionError> {
        (**self).run_query(query).await
    }

    async fn close(self) {}
}

/// Connection descriptor for one graph endpoint.
#[derive(Clone, Serialize)]
pub struct Endpoint {
    pub uri: String,
    pub user: String,
    #[serde(skip)]
    pub password: String,
}

impl Endpoint {
    pub fn new(uri: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.uri)
    }
}
