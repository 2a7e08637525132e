//! Bolt adapter backed by `neo4rs`.

use log::debug;
use neo4rs::{BoltType, Graph, query};
use serde_json::Value;

use super::{Endpoint, GraphSession};
use crate::{
    errors::SessionError,
    query::{GraphQuery, Row},
};

pub struct Neo4jSession {
    graph: Graph,
    uri: String,
}

impl Neo4jSession {
    /// Connect and verify the endpoint answers a trivial query.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, SessionError> {
        let graph = Graph::new(endpoint.uri.as_str(), endpoint.user.as_str(), endpoint.password.as_str())
            .await
            .map_err(|err| SessionError::connection(format!("failed to connect to {}: {err}", endpoint.uri)))?;

        let mut session = Self {
            graph,
            uri: endpoint.uri.clone(),
        };
        session
            .run_query(&GraphQuery::Ping)
            .await
            .map_err(|err| SessionError::connection(format!("{} did not answer: {err}", endpoint.uri)))?;
        Ok(session)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl GraphSession for Neo4jSession {
    async fn run_query(&mut self, graph_query: &GraphQuery) -> Result<Vec<Row>, SessionError> {
        let statement = graph_query.to_cypher();
        debug!("{}: {}", self.uri, statement.text);

        let mut bolt_query = query(&statement.text);
        for (name, value) in &statement.params {
            bolt_query = bolt_query.param(name, bolt_param(value));
        }

        let mut stream = self
            .graph
            .execute(bolt_query)
            .await
            .map_err(session_error)?;

        let columns = graph_query.columns();
        let mut rows = Vec::new();
        while let Some(bolt_row) = stream.next().await.map_err(session_error)? {
            let mut row = Row::new();
            for column in &columns {
                let value: Value = bolt_row
                    .get(column)
                    .map_err(|err| SessionError::query(format!("column '{column}': {err}")))?;
                row.insert(column.clone(), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(self) {
        debug!("closing session to {}", self.uri);
        drop(self.graph);
    }
}

/// Transport and authentication failures end the run; everything else is a
/// failed query the caller can recover from.
fn session_error(err: neo4rs::Error) -> SessionError {
    match &err {
        neo4rs::Error::IOError { .. }
        | neo4rs::Error::ConnectionError
        | neo4rs::Error::AuthenticationError(_)
        | neo4rs::Error::UrlParseError(_)
        | neo4rs::Error::UnsupportedScheme(_)
        | neo4rs::Error::InvalidDnsName(_) => SessionError::connection(err.to_string()),
        _ => SessionError::query(err.to_string()),
    }
}

/// Parameters are only ever integers, strings or string lists.
fn bolt_param(value: &Value) -> BoltType {
    match value {
        Value::Number(n) => BoltType::from(n.as_i64().unwrap_or(i64::MAX)),
        Value::String(s) => BoltType::from(s.clone()),
        Value::Array(items) => BoltType::from(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<String>>(),
        ),
        other => BoltType::from(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn dropped_socket_is_fatal() {
        let err = session_error(neo4rs::Error::from(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));
        assert!(err.is_fatal());
    }

    #[test]
    fn rejected_credentials_are_fatal() {
        let err = session_error(neo4rs::Error::AuthenticationError("unauthorized".to_string()));
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_results_are_recoverable() {
        let err = session_error(neo4rs::Error::UnexpectedMessage("SUCCESS".to_string()));
        assert!(!err.is_fatal());
    }

    #[test]
    fn integer_params_keep_their_value() {
        assert_eq!(bolt_param(&Value::from(10_u64)), BoltType::from(10_i64));
    }
}
