//! Built-in handlers addressable by name from `[[routes]]` config entries.

use bytes::Bytes;
use tracing::debug;
use turnloop_core::{ComputeConfig, RouteConfig, RouteKind};

use super::{Handler, Request, RouteTable, WorkloadFactory};
use crate::chunker::{ChunkBudget, HashWorkload, Workload};
use crate::error::{DispatchError, RouteError};

/// Body returned by the `ok` handler.
pub const HEALTH_BODY: &[u8] = b"all good \n";

/// `ok`: constant liveness answer.
pub fn ok_handler(_request: &Request) -> Result<Bytes, DispatchError> {
    debug!("server is healthy");
    Ok(Bytes::from_static(HEALTH_BODY))
}

/// `echo`: return the request body unchanged.
pub fn echo_handler(request: &Request) -> Result<Bytes, DispatchError> {
    Ok(request.body.clone())
}

/// `hash`: the seeded SHA-256 demonstration workload.
pub fn hash_factory(iterations: u64, seed: u64) -> WorkloadFactory {
    std::rc::Rc::new(move |_request: &Request| {
        Ok(Box::new(HashWorkload::new(iterations, seed)) as Box<dyn Workload>)
    })
}

fn builtin(route: &RouteConfig, compute: &ComputeConfig) -> Result<Handler, RouteError> {
    let mismatch = || RouteError::KindMismatch {
        route: route.key.clone(),
        handler: route.handler.clone(),
        kind: route.kind,
    };
    match (route.handler.as_str(), route.kind) {
        ("ok", RouteKind::Plain) => Ok(Handler::plain(ok_handler)),
        ("echo", RouteKind::Plain) => Ok(Handler::plain(echo_handler)),
        ("hash", RouteKind::Chunked) => Ok(Handler::Chunked(hash_factory(
            compute.iterations,
            compute.seed,
        ))),
        ("hash", RouteKind::Yielding) => Ok(Handler::Yielding {
            factory: hash_factory(compute.iterations, compute.seed),
            budget: ChunkBudget::Iterations(compute.chunk_iterations),
        }),
        ("ok" | "echo" | "hash", _) => Err(mismatch()),
        (other, _) => Err(RouteError::UnknownHandler {
            route: route.key.clone(),
            handler: other.to_string(),
        }),
    }
}

impl RouteTable {
    /// Build a table from `[[routes]]` entries using the built-in handlers.
    pub fn from_config(routes: &[RouteConfig], compute: &ComputeConfig) -> Result<Self, RouteError> {
        let mut builder = RouteTable::builder();
        for route in routes {
            builder.register(route.key.clone(), builtin(route, compute)?)?;
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnloop_core::config::default_routes;

    #[test]
    fn default_routes_build() {
        let table = RouteTable::from_config(&default_routes(), &ComputeConfig::default()).unwrap();
        assert_eq!(table.get("/health").unwrap().kind(), RouteKind::Plain);
        assert_eq!(table.get("/compute").unwrap().kind(), RouteKind::Chunked);
        assert!(matches!(
            table.get("/compute-fast"),
            Some(Handler::Yielding {
                budget: ChunkBudget::Iterations(1000),
                ..
            })
        ));
    }

    #[test]
    fn echo_returns_body() {
        let req = Request {
            route: "/echo".into(),
            body: Bytes::from_static(b"ping"),
        };
        assert_eq!(echo_handler(&req).unwrap(), Bytes::from_static(b"ping"));
    }

    #[test]
    fn unknown_handler_rejected() {
        let routes = vec![RouteConfig::new("/x", RouteKind::Plain, "nope")];
        let err = RouteTable::from_config(&routes, &ComputeConfig::default()).unwrap_err();
        assert!(matches!(err, RouteError::UnknownHandler { .. }));
    }

    #[test]
    fn plain_hash_is_a_kind_mismatch() {
        let routes = vec![RouteConfig::new("/x", RouteKind::Plain, "hash")];
        let err = RouteTable::from_config(&routes, &ComputeConfig::default()).unwrap_err();
        assert_eq!(
            err,
            RouteError::KindMismatch {
                route: "/x".into(),
                handler: "hash".into(),
                kind: RouteKind::Plain,
            }
        );
    }

    #[test]
    fn duplicate_key_rejected() {
        let routes = vec![
            RouteConfig::new("/x", RouteKind::Plain, "ok"),
            RouteConfig::new("/x", RouteKind::Plain, "echo"),
        ];
        let err = RouteTable::from_config(&routes, &ComputeConfig::default()).unwrap_err();
        assert_eq!(err, RouteError::DuplicateRoute("/x".into()));
    }
}
