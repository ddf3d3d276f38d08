//! Prefix routing engine
//!
//! Selects the carrier for a destination by longest-prefix match, then
//! walks the prefix's routes in `priority desc, cost asc` order until an
//! operator is both active and under capacity. Bindings and the prefix
//! set are cached with a bounded TTL; the cache is an optimization,
//! never a correctness source.

use std::sync::Arc;
use std::time::Duration;
use tarn_core::Msisdn;
use tracing::{debug, instrument};

use crate::cache::TtlCache;
use crate::error::{Result, SmscError};
use crate::store::{GatewayStore, Operator, Route};
use crate::throttle::CapacityGate;

/// TTL for route bindings and the prefix set
pub const ROUTE_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct RouteBinding {
    operator_id: i64,
}

pub struct RoutingEngine {
    store: Arc<dyn GatewayStore>,
    gate: Arc<CapacityGate>,
    bindings: TtlCache<String, RouteBinding>,
    prefixes: TtlCache<(), Arc<Vec<String>>>,
}

impl RoutingEngine {
    pub fn new(store: Arc<dyn GatewayStore>, gate: Arc<CapacityGate>) -> Self {
        Self {
            store,
            gate,
            bindings: TtlCache::new(ROUTE_CACHE_TTL),
            prefixes: TtlCache::new(ROUTE_CACHE_TTL),
        }
    }

    /// Select an operator for the recipient.
    ///
    /// Single-shot: failures are reported upward, never retried here.
    /// Retry policy belongs to the caller.
    #[instrument(skip(self))]
    pub async fn find_route(&self, recipient: &str) -> Result<Operator> {
        let normalized = Msisdn::new(recipient);
        if normalized.is_empty() {
            return Err(SmscError::RouteNotFound);
        }
        let binding_key = normalized.as_str().to_string();

        // Cached binding is honored only while the operator is active.
        if let Some(binding) = self.bindings.get(&binding_key) {
            if let Some(operator) = self.store.operator(binding.operator_id).await? {
                if operator.status.is_active() {
                    debug!(recipient = %normalized, operator = %operator.name, "Route cache hit");
                    return Ok(operator);
                }
            }
            self.bindings.invalidate(&binding_key);
        }

        let prefix = self
            .longest_matching_prefix(&normalized)
            .await?
            .ok_or(SmscError::RouteNotFound)?;

        let mut routes = self.store.routes_for_prefix(&prefix).await?;
        routes.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.cost.cmp(&b.cost)));

        for route in &routes {
            let Some(operator) = self.store.operator(route.operator_id).await? else {
                continue;
            };
            if !operator.status.is_active() {
                debug!(operator = %operator.name, "Skipping inactive operator");
                continue;
            }
            if !self.gate.has_capacity(&operator).await? {
                continue;
            }

            debug!(
                recipient = %normalized,
                prefix = %prefix,
                operator = %operator.name,
                "Route selected"
            );
            self.bindings
                .insert(binding_key, RouteBinding { operator_id: operator.id });
            return Ok(operator);
        }

        Err(SmscError::NoAvailableOperator)
    }

    /// Replace the routing table and drop every cached decision
    pub async fn replace_routes(&self, routes: &[Route]) -> Result<()> {
        self.store.replace_routes(routes).await?;
        self.flush_caches();
        Ok(())
    }

    pub fn flush_caches(&self) {
        self.bindings.clear();
        self.prefixes.clear();
    }

    /// Longest configured prefix that is a literal prefix of the
    /// normalized number. Prefixes are compared digit-wise so a stored
    /// "1900" matches "+19005551234".
    async fn longest_matching_prefix(&self, number: &Msisdn) -> Result<Option<String>> {
        let prefixes = match self.prefixes.get(&()) {
            Some(cached) => cached,
            None => {
                let mut list = self.store.route_prefixes().await?;
                list.sort_by(|a, b| b.len().cmp(&a.len()));
                let list = Arc::new(list);
                self.prefixes.insert((), list.clone());
                list
            }
        };

        let digits = number.digits();
        Ok(prefixes
            .iter()
            .find(|p| digits.starts_with(p.trim_start_matches('+')))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use tarn_core::OperatorStatus;
    use tarn_sigtran::EndpointConfig;

    fn operator(name: &str, status: OperatorStatus, max_tps: u32) -> Operator {
        Operator {
            id: 0,
            name: name.into(),
            country_code: "1".into(),
            status,
            priority: 1,
            max_tps,
            connection: EndpointConfig::new("192.0.2.1", 2905),
        }
    }

    fn route(prefix: &str, operator_id: i64, priority: i32, cost: &str) -> Route {
        Route {
            prefix: prefix.into(),
            operator_id,
            priority,
            cost: cost.parse::<Decimal>().unwrap(),
        }
    }

    async fn engine_with(
        operators: Vec<Operator>,
        routes: Vec<Route>,
    ) -> (RoutingEngine, Arc<MemoryStore>, Vec<i64>) {
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for op in &operators {
            ids.push(store.upsert_operator(op).await.unwrap());
        }
        store.replace_routes(&routes).await.unwrap();
        let gate = Arc::new(CapacityGate::new(store.clone()));
        (RoutingEngine::new(store.clone(), gate), store, ids)
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let (engine, _store, ids) = engine_with(
            vec![
                operator("short", OperatorStatus::Active, 100),
                operator("long", OperatorStatus::Active, 100),
            ],
            vec![],
        )
        .await;
        engine
            .replace_routes(&[
                route("1", ids[0], 1, "1.0"),
                route("1900", ids[1], 1, "1.0"),
            ])
            .await
            .unwrap();

        let selected = engine.find_route("+19005551234").await.unwrap();
        assert_eq!(selected.name, "long");

        // a number outside the long prefix falls back to the short one
        let selected = engine.find_route("+12125551234").await.unwrap();
        assert_eq!(selected.name, "short");
    }

    #[tokio::test]
    async fn lower_cost_wins_at_equal_priority() {
        let (engine, _store, ids) = engine_with(
            vec![
                operator("pricey", OperatorStatus::Active, 100),
                operator("cheap", OperatorStatus::Active, 100),
            ],
            vec![],
        )
        .await;
        engine
            .replace_routes(&[
                route("1900", ids[0], 10, "1.0"),
                route("1900", ids[1], 10, "0.5"),
            ])
            .await
            .unwrap();

        let selected = engine.find_route("+19005551234").await.unwrap();
        assert_eq!(selected.name, "cheap");
    }

    #[tokio::test]
    async fn higher_priority_wins_regardless_of_cost() {
        let (engine, _store, ids) = engine_with(
            vec![
                operator("low-prio", OperatorStatus::Active, 100),
                operator("high-prio", OperatorStatus::Active, 100),
            ],
            vec![],
        )
        .await;
        engine
            .replace_routes(&[
                route("1900", ids[0], 5, "0.1"),
                route("1900", ids[1], 10, "9.9"),
            ])
            .await
            .unwrap();

        let selected = engine.find_route("+19005551234").await.unwrap();
        assert_eq!(selected.name, "high-prio");
    }

    #[tokio::test]
    async fn saturated_top_candidate_falls_through() {
        let (engine, _store, ids) = engine_with(
            vec![
                // max_tps of zero: permanently at capacity
                operator("saturated", OperatorStatus::Active, 0),
                operator("fallback", OperatorStatus::Active, 100),
            ],
            vec![],
        )
        .await;
        engine
            .replace_routes(&[
                route("1900", ids[0], 10, "1.0"),
                route("1900", ids[1], 5, "1.0"),
            ])
            .await
            .unwrap();

        let selected = engine.find_route("+19005551234").await.unwrap();
        assert_eq!(selected.name, "fallback");
    }

    #[tokio::test]
    async fn all_candidates_exhausted_is_no_available_operator() {
        let (engine, _store, ids) = engine_with(
            vec![
                operator("saturated", OperatorStatus::Active, 0),
                operator("inactive", OperatorStatus::Inactive, 100),
            ],
            vec![],
        )
        .await;
        engine
            .replace_routes(&[
                route("1900", ids[0], 10, "1.0"),
                route("1900", ids[1], 5, "1.0"),
            ])
            .await
            .unwrap();

        match engine.find_route("+19005551234").await {
            Err(SmscError::NoAvailableOperator) => {}
            other => panic!("expected NoAvailableOperator, got {:?}", other.map(|o| o.name)),
        }
    }

    #[tokio::test]
    async fn unknown_prefix_is_route_not_found() {
        let (engine, _store, _ids) =
            engine_with(vec![operator("any", OperatorStatus::Active, 100)], vec![]).await;

        match engine.find_route("+4915155501234").await {
            Err(SmscError::RouteNotFound) => {}
            other => panic!("expected RouteNotFound, got {:?}", other.map(|o| o.name)),
        }
    }

    #[tokio::test]
    async fn digitless_recipient_is_route_not_found() {
        let (engine, _store, _ids) = engine_with(vec![], vec![]).await;
        assert!(matches!(
            engine.find_route("not-a-number").await,
            Err(SmscError::RouteNotFound)
        ));
    }

    #[tokio::test]
    async fn cached_binding_is_dropped_when_operator_goes_inactive() {
        let (engine, store, ids) = engine_with(
            vec![operator("flaky", OperatorStatus::Active, 100)],
            vec![],
        )
        .await;
        engine
            .replace_routes(&[route("1900", ids[0], 1, "1.0")])
            .await
            .unwrap();

        // first lookup caches the binding
        let selected = engine.find_route("+19005551234").await.unwrap();
        assert_eq!(selected.id, ids[0]);

        // operator goes inactive out-of-band
        let mut flaky = store.operator(ids[0]).await.unwrap().unwrap();
        flaky.status = OperatorStatus::Inactive;
        store.upsert_operator(&flaky).await.unwrap();

        // the cached binding must not resurrect the inactive operator,
        // even inside the TTL window
        match engine.find_route("+19005551234").await {
            Err(SmscError::NoAvailableOperator) => {}
            other => panic!("expected NoAvailableOperator, got {:?}", other.map(|o| o.name)),
        }
    }
}
