//! Integration tests for flow chains driving an external resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use saga::{FlowChain, SagaState, Step};

/// A tiny key/value service standing in for a remote system.
#[derive(Clone, Default)]
struct Registry {
    entries: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Registry {
    async fn put(&self, key: &str, value: &str) -> Result<(), String> {
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(format!("put {key}"));
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Err(format!("{key} already present"));
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) {
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(format!("delete {key}"));
        self.entries.lock().unwrap().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct Provisioning {
    registry: Registry,
    owner: String,
    written: Vec<String>,
}

impl Provisioning {
    async fn write(&mut self, key: &str) -> Result<(), String> {
        self.registry.put(key, &self.owner).await?;
        self.written.push(key.to_string());
        Ok(())
    }

    async fn erase(&mut self, key: &str) {
        self.registry.delete(key).await;
        self.written.retain(|k| k != key);
    }
}

fn write_step(key: &'static str) -> Step<Provisioning, String> {
    Step::new(format!("write-{key}"), move |ctx: &mut Provisioning| {
        Box::pin(ctx.write(key))
    })
    .with_rollback(move |ctx: &mut Provisioning| Box::pin(ctx.erase(key)))
}

fn chain(keys: &[&'static str]) -> FlowChain<Provisioning, String> {
    keys.iter()
        .fold(FlowChain::new("provision"), |chain, key| {
            chain.then(write_step(*key))
        })
}

#[tokio::test]
async fn successful_chain_leaves_all_writes() {
    let registry = Registry::default();
    let mut ctx = Provisioning {
        registry: registry.clone(),
        owner: "lb-1".to_string(),
        written: Vec::new(),
    };

    let report = chain(&["a", "b", "c"]).run(&mut ctx).await.unwrap();

    assert_eq!(report.state, SagaState::Completed);
    assert_eq!(registry.keys(), vec!["a", "b", "c"]);
    assert_eq!(ctx.written, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn conflicting_write_unwinds_earlier_writes() {
    let registry = Registry::default();
    registry.put("c", "someone-else").await.unwrap();

    let mut ctx = Provisioning {
        registry: registry.clone(),
        owner: "lb-1".to_string(),
        written: Vec::new(),
    };

    let failure = chain(&["a", "b", "c", "d"]).run(&mut ctx).await.unwrap_err();

    assert_eq!(failure.failed_step(), "write-c");
    assert_eq!(failure.report.rolled_back, vec!["write-b", "write-a"]);
    assert_eq!(failure.error, "c already present");

    // Only the pre-existing entry survives and "d" was never attempted.
    assert_eq!(registry.keys(), vec!["c"]);
    assert!(ctx.written.is_empty());
    assert_eq!(
        registry.calls(),
        vec!["put c", "put a", "put b", "put c", "delete b", "delete a"]
    );
}

#[tokio::test]
async fn independent_chains_run_concurrently() {
    let registry = Registry::default();

    let mut handles = Vec::new();
    for owner in ["lb-1", "lb-2"] {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let mut ctx = Provisioning {
                registry,
                owner: owner.to_string(),
                written: Vec::new(),
            };
            let keys: [&'static str; 2] = if owner == "lb-1" {
                ["x1", "x2"]
            } else {
                ["y1", "y2"]
            };
            chain(&keys).run(&mut ctx).await.map(|r| r.state)
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), SagaState::Completed);
    }
    assert_eq!(registry.keys(), vec!["x1", "x2", "y1", "y2"]);
}
