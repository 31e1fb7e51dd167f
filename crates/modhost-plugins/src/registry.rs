//! Module registry
//!
//! The single authoritative store of module records. Reads go through an
//! `Arc` snapshot that is replaced copy-on-write, so the access gate and
//! listing never wait on a mutation. Writers must first hold the
//! [`ModuleSlot`] for the id they mutate; at most one slot per id exists at
//! a time.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use modhost_kernel::{ModuleDescriptor, ModuleError, ModuleResult, ModuleState};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, broadcast};
use tracing::{debug, info};

use crate::loader::ModuleHandle;

/// Registry view of one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    pub descriptor: ModuleDescriptor,
    pub state: ModuleState,
    /// Failure detail, only while `Failed`
    pub last_error: Option<String>,
    /// Time of the last successful install
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    handle: Option<Arc<ModuleHandle>>,
}

impl ModuleRecord {
    fn discovered(descriptor: ModuleDescriptor) -> Self {
        Self {
            descriptor,
            state: ModuleState::Discovered,
            last_error: None,
            loaded_at: None,
            handle: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn handle(&self) -> Option<&Arc<ModuleHandle>> {
        self.handle.as_ref()
    }

    pub fn artifact_hash(&self) -> Option<&str> {
        self.handle.as_deref().map(ModuleHandle::artifact_hash)
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ModuleState::Enabled
    }
}

/// Change notification published after every state mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    StateChanged {
        id: String,
        /// `None` for a newly registered module
        from: Option<ModuleState>,
        to: ModuleState,
    },
}

/// Result of [`ModuleRegistry::upsert_discovered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub discovered: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub failed: usize,
    /// Installing or uninstalling
    pub in_flight: usize,
}

type RecordMap = BTreeMap<String, ModuleRecord>;
type SlotTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Exclusive right to mutate one module id.
///
/// Released on drop.
pub struct ModuleSlot {
    id: String,
    table: SlotTable,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ModuleSlot {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for ModuleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSlot").field("id", &self.id).finish()
    }
}

impl Drop for ModuleSlot {
    fn drop(&mut self) {
        drop(self.guard.take());
        release_slot_entry(&self.table, &self.id, &self.lock);
    }
}

/// Remove the table entry once nobody but the table and `lock` reference it.
fn release_slot_entry(table: &SlotTable, id: &str, lock: &Arc<AsyncMutex<()>>) {
    let mut slots = table.lock();
    let idle = slots
        .get(id)
        .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(lock) == 2);
    if idle {
        slots.remove(id);
    }
}

pub struct ModuleRegistry {
    records: RwLock<Arc<RecordMap>>,
    slots: SlotTable,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            records: RwLock::new(Arc::new(BTreeMap::new())),
            slots: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    // ----- reads -----

    /// Current record set. Never blocks behind a mutation slot.
    pub fn snapshot(&self) -> Arc<RecordMap> {
        self.records.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<ModuleRecord> {
        self.snapshot().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ModuleRecord> {
        self.snapshot().values().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().contains_key(id)
    }

    /// Record whose module directory is `dir`.
    pub fn find_by_dir(&self, dir: &Path) -> Option<ModuleRecord> {
        self.snapshot()
            .values()
            .find(|r| r.descriptor.module_dir() == dir)
            .cloned()
    }

    pub fn stats(&self) -> RegistryStats {
        let snapshot = self.snapshot();
        let mut stats = RegistryStats {
            total: snapshot.len(),
            ..Default::default()
        };
        for record in snapshot.values() {
            match record.state {
                ModuleState::Discovered => stats.discovered += 1,
                ModuleState::Enabled => stats.enabled += 1,
                ModuleState::Disabled => stats.disabled += 1,
                ModuleState::Failed => stats.failed += 1,
                ModuleState::Installing | ModuleState::Uninstalling => stats.in_flight += 1,
                ModuleState::Removed => {}
            }
        }
        stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    // ----- mutation slots -----

    fn slot_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
        self.slots
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for the mutation slot of `id`.
    pub async fn acquire(&self, id: &str) -> ModuleSlot {
        let lock = self.slot_lock(id);
        let guard = lock.clone().lock_owned().await;
        ModuleSlot {
            id: id.to_string(),
            table: self.slots.clone(),
            lock,
            guard: Some(guard),
        }
    }

    /// Take the mutation slot of `id`, or fail with a conflict if it is held.
    pub fn try_acquire(&self, id: &str) -> ModuleResult<ModuleSlot> {
        let lock = self.slot_lock(id);
        match lock.clone().try_lock_owned() {
            Ok(guard) => Ok(ModuleSlot {
                id: id.to_string(),
                table: self.slots.clone(),
                lock,
                guard: Some(guard),
            }),
            Err(_) => {
                release_slot_entry(&self.slots, id, &lock);
                Err(ModuleError::conflict(id, "another operation is in progress"))
            }
        }
    }

    /// Whether a mutation on `id` is in flight right now.
    pub fn is_busy(&self, id: &str) -> bool {
        self.slots
            .lock()
            .get(id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    // ----- mutations -----

    fn check_slot(&self, slot: &ModuleSlot) -> ModuleResult<()> {
        if Arc::ptr_eq(&slot.table, &self.slots) {
            Ok(())
        } else {
            Err(ModuleError::conflict(
                &slot.id,
                "mutation slot belongs to another registry",
            ))
        }
    }

    fn commit<R>(
        &self,
        slot: &ModuleSlot,
        apply: impl FnOnce(&mut RecordMap) -> ModuleResult<(R, Option<RegistryEvent>)>,
    ) -> ModuleResult<R> {
        self.check_slot(slot)?;
        let (result, event) = {
            let mut records = self.records.write();
            apply(Arc::make_mut(&mut records))?
        };
        if let Some(event) = event {
            let RegistryEvent::StateChanged { id, from, to } = &event;
            match from {
                Some(from) => info!(module_id = %id, %from, %to, "Module state changed"),
                None => info!(module_id = %id, %to, "Module registered"),
            }
            let _ = self.events.send(event);
        }
        Ok(result)
    }

    /// Move `id` from `allowed` states to `to`, applying `update` to the record.
    fn transition(
        &self,
        slot: &ModuleSlot,
        action: &'static str,
        allowed: &[ModuleState],
        to: ModuleState,
        update: impl FnOnce(&mut ModuleRecord),
    ) -> ModuleResult<()> {
        self.commit(slot, |records| {
            let id = slot.id.as_str();
            let record = records
                .get_mut(id)
                .ok_or_else(|| ModuleError::NotFound(id.to_string()))?;
            let from = record.state;
            if !allowed.contains(&from) {
                return Err(ModuleError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    action,
                });
            }
            record.state = to;
            update(record);
            Ok((
                (),
                Some(RegistryEvent::StateChanged {
                    id: id.to_string(),
                    from: Some(from),
                    to,
                }),
            ))
        })
    }

    /// Register a descriptor found on disk.
    ///
    /// Refreshes the descriptor of a `Discovered` or `Failed` record in place.
    /// A different module directory claiming a registered id is a conflict.
    pub fn upsert_discovered(
        &self,
        slot: &ModuleSlot,
        descriptor: ModuleDescriptor,
    ) -> ModuleResult<UpsertOutcome> {
        if descriptor.id != slot.id {
            return Err(ModuleError::conflict(
                &descriptor.id,
                format!("mutation slot is held for '{}'", slot.id),
            ));
        }
        self.commit(slot, |records| {
            let id = descriptor.id.clone();
            let Some(record) = records.get_mut(&id) else {
                records.insert(id.clone(), ModuleRecord::discovered(descriptor));
                return Ok((
                    UpsertOutcome::Inserted,
                    Some(RegistryEvent::StateChanged {
                        id,
                        from: None,
                        to: ModuleState::Discovered,
                    }),
                ));
            };

            if record.descriptor.module_dir() != descriptor.module_dir() {
                return Err(ModuleError::conflict(
                    &id,
                    format!(
                        "id already registered from {}",
                        record.descriptor.module_dir().display()
                    ),
                ));
            }
            if record.descriptor == descriptor {
                return Ok((UpsertOutcome::Unchanged, None));
            }
            match record.state {
                ModuleState::Discovered | ModuleState::Failed => {
                    debug!(module_id = %id, "Refreshing module descriptor");
                    record.descriptor = descriptor;
                    Ok((UpsertOutcome::Updated, None))
                }
                from => Err(ModuleError::InvalidTransition {
                    id,
                    from,
                    action: "rediscover",
                }),
            }
        })
    }

    pub fn transition_to_installing(&self, slot: &ModuleSlot) -> ModuleResult<()> {
        self.transition(
            slot,
            "install",
            &[ModuleState::Discovered, ModuleState::Failed],
            ModuleState::Installing,
            |record| record.last_error = None,
        )
    }

    /// Finish a load, landing in `Enabled`, or straight in `Disabled` when
    /// `enabled` is false.
    pub fn complete_install(
        &self,
        slot: &ModuleSlot,
        handle: ModuleHandle,
        enabled: bool,
    ) -> ModuleResult<()> {
        let target = if enabled {
            ModuleState::Enabled
        } else {
            ModuleState::Disabled
        };
        self.transition(
            slot,
            "complete install",
            &[ModuleState::Installing],
            target,
            |record| {
                record.handle = Some(Arc::new(handle));
                record.loaded_at = Some(Utc::now());
                record.last_error = None;
            },
        )
    }

    pub fn fail_install(&self, slot: &ModuleSlot, error: impl Into<String>) -> ModuleResult<()> {
        let error = error.into();
        self.transition(
            slot,
            "fail install",
            &[ModuleState::Installing],
            ModuleState::Failed,
            |record| {
                record.handle = None;
                record.last_error = Some(error);
            },
        )
    }

    /// Switch between `Enabled` and `Disabled`.
    ///
    /// Returns `false` when the module already was in the requested state.
    pub fn set_enabled(&self, slot: &ModuleSlot, enabled: bool) -> ModuleResult<bool> {
        let (action, target) = if enabled {
            ("enable", ModuleState::Enabled)
        } else {
            ("disable", ModuleState::Disabled)
        };
        let current = self
            .get(&slot.id)
            .ok_or_else(|| ModuleError::NotFound(slot.id.clone()))?;
        if current.state == target {
            return Ok(false);
        }
        self.transition(
            slot,
            action,
            &[ModuleState::Enabled, ModuleState::Disabled],
            target,
            |_| {},
        )?;
        Ok(true)
    }

    /// Enter `Uninstalling`, handing back the live instance to unload.
    pub fn begin_uninstall(&self, slot: &ModuleSlot) -> ModuleResult<Option<Arc<ModuleHandle>>> {
        let mut taken = None;
        self.transition(
            slot,
            "uninstall",
            &[
                ModuleState::Enabled,
                ModuleState::Disabled,
                ModuleState::Failed,
            ],
            ModuleState::Uninstalling,
            |record| taken = record.handle.take(),
        )?;
        Ok(taken)
    }

    /// Evict an `Uninstalling` record.
    pub fn complete_uninstall(&self, slot: &ModuleSlot) -> ModuleResult<ModuleRecord> {
        self.evict(slot, "complete uninstall", ModuleState::Uninstalling)
    }

    /// Evict a never-loaded `Discovered` record.
    pub fn discard(&self, slot: &ModuleSlot) -> ModuleResult<ModuleRecord> {
        self.evict(slot, "discard", ModuleState::Discovered)
    }

    fn evict(
        &self,
        slot: &ModuleSlot,
        action: &'static str,
        expected: ModuleState,
    ) -> ModuleResult<ModuleRecord> {
        self.commit(slot, |records| {
            let id = slot.id.as_str();
            let from = records
                .get(id)
                .map(|r| r.state)
                .ok_or_else(|| ModuleError::NotFound(id.to_string()))?;
            if from != expected {
                return Err(ModuleError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    action,
                });
            }
            let mut record = records
                .remove(id)
                .ok_or_else(|| ModuleError::NotFound(id.to_string()))?;
            record.state = ModuleState::Removed;
            Ok((
                record,
                Some(RegistryEvent::StateChanged {
                    id: id.to_string(),
                    from: Some(from),
                    to: ModuleState::Removed,
                }),
            ))
        })
    }

    /// Reset records stuck in `Installing`/`Uninstalling` with no live
    /// mutation back to `Discovered`, returning their ids.
    pub fn recover_interrupted(&self) -> Vec<String> {
        let stuck: Vec<String> = self
            .snapshot()
            .values()
            .filter(|r| r.state.is_transient())
            .map(|r| r.descriptor.id.clone())
            .collect();

        let mut recovered = Vec::new();
        for id in stuck {
            let Ok(slot) = self.try_acquire(&id) else {
                continue;
            };
            let reset = self.transition(
                &slot,
                "recover",
                &[ModuleState::Installing, ModuleState::Uninstalling],
                ModuleState::Discovered,
                |record| {
                    record.handle = None;
                    record.last_error = None;
                },
            );
            if reset.is_ok() {
                recovered.push(id);
            }
        }
        recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MaterializedModule;
    use modhost_kernel::{ConfigScope, HookError, HostModule, ServiceRegistrar};
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::time::Duration;

    struct Noop;

    #[async_trait::async_trait]
    impl HostModule for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn configure(
            &self,
            _services: Arc<dyn ServiceRegistrar>,
            _scope: ConfigScope,
        ) -> Result<(), HookError> {
            Ok(())
        }
    }

    fn descriptor(id: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            manifest_path: PathBuf::from(format!("/plugins/{id}/manifest.json")),
            artifact_path: PathBuf::from(format!("/plugins/{id}/lib{id}.so")),
            entry_point: "create".into(),
            capabilities: BTreeSet::new(),
            route_prefix: format!("/api/{id}"),
            description: None,
        }
    }

    fn handle(id: &str) -> ModuleHandle {
        ModuleHandle::new(
            id,
            MaterializedModule::linked(Box::new(Noop)),
            format!("/plugins/{id}/lib{id}.so"),
            "abc123",
        )
    }

    async fn installed(registry: &ModuleRegistry, id: &str) {
        let slot = registry.acquire(id).await;
        registry.upsert_discovered(&slot, descriptor(id)).unwrap();
        registry.transition_to_installing(&slot).unwrap();
        registry.complete_install(&slot, handle(id), true).unwrap();
    }

    #[tokio::test]
    async fn test_install_lifecycle() {
        let registry = ModuleRegistry::new();
        let slot = registry.acquire("alpha").await;

        assert_eq!(
            registry.upsert_discovered(&slot, descriptor("alpha")).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(registry.get("alpha").unwrap().state, ModuleState::Discovered);

        registry.transition_to_installing(&slot).unwrap();
        registry.complete_install(&slot, handle("alpha"), true).unwrap();

        let record = registry.get("alpha").unwrap();
        assert_eq!(record.state, ModuleState::Enabled);
        assert!(record.loaded_at.is_some());
        assert_eq!(record.artifact_hash(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_install_can_land_disabled() {
        let registry = ModuleRegistry::new();
        let mut events = registry.subscribe();
        let slot = registry.acquire("alpha").await;
        registry.upsert_discovered(&slot, descriptor("alpha")).unwrap();
        registry.transition_to_installing(&slot).unwrap();
        registry.complete_install(&slot, handle("alpha"), false).unwrap();

        assert_eq!(registry.get("alpha").unwrap().state, ModuleState::Disabled);
        let mut seen = Vec::new();
        while let Ok(RegistryEvent::StateChanged { to, .. }) = events.try_recv() {
            seen.push(to);
        }
        assert_eq!(
            seen,
            vec![
                ModuleState::Discovered,
                ModuleState::Installing,
                ModuleState::Disabled
            ]
        );
    }

    #[tokio::test]
    async fn test_discovered_cannot_be_enabled() {
        let registry = ModuleRegistry::new();
        let slot = registry.acquire("alpha").await;
        registry.upsert_discovered(&slot, descriptor("alpha")).unwrap();

        let err = registry.set_enabled(&slot, true).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::InvalidTransition {
                from: ModuleState::Discovered,
                action: "enable",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_install_keeps_descriptor_and_drops_handle() {
        let registry = ModuleRegistry::new();
        let slot = registry.acquire("alpha").await;
        registry.upsert_discovered(&slot, descriptor("alpha")).unwrap();
        registry.transition_to_installing(&slot).unwrap();
        registry.fail_install(&slot, "boom").unwrap();

        let record = registry.get("alpha").unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
        assert!(record.handle().is_none());
        assert_eq!(record.descriptor, descriptor("alpha"));

        // reinstall from Failed
        registry.transition_to_installing(&slot).unwrap();
        assert_eq!(registry.get("alpha").unwrap().last_error, None);
    }

    #[tokio::test]
    async fn test_enable_disable_is_idempotent_and_preserves_descriptor() {
        let registry = ModuleRegistry::new();
        installed(&registry, "alpha").await;
        let before = registry.get("alpha").unwrap().descriptor;

        let slot = registry.acquire("alpha").await;
        assert!(registry.set_enabled(&slot, false).unwrap());
        assert!(!registry.set_enabled(&slot, false).unwrap());
        assert_eq!(registry.get("alpha").unwrap().state, ModuleState::Disabled);
        assert!(registry.set_enabled(&slot, true).unwrap());
        assert!(!registry.set_enabled(&slot, true).unwrap());
        assert_eq!(registry.get("alpha").unwrap().descriptor, before);
    }

    #[tokio::test]
    async fn test_uninstall_evicts_record() {
        let registry = ModuleRegistry::new();
        installed(&registry, "alpha").await;
        let slot = registry.acquire("alpha").await;

        let handle = registry.begin_uninstall(&slot).unwrap();
        assert!(handle.is_some());
        assert_eq!(registry.get("alpha").unwrap().state, ModuleState::Uninstalling);

        let removed = registry.complete_uninstall(&slot).unwrap();
        assert_eq!(removed.state, ModuleState::Removed);
        assert!(registry.get("alpha").is_none());

        // id is free for a fresh discovery
        assert_eq!(
            registry.upsert_discovered(&slot, descriptor("alpha")).unwrap(),
            UpsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_discard_only_applies_to_discovered() {
        let registry = ModuleRegistry::new();
        installed(&registry, "alpha").await;
        let slot = registry.acquire("alpha").await;
        assert!(matches!(
            registry.discard(&slot),
            Err(ModuleError::InvalidTransition { .. })
        ));

        let slot = registry.acquire("beta").await;
        assert!(matches!(registry.discard(&slot), Err(ModuleError::NotFound(_))));
        registry.upsert_discovered(&slot, descriptor("beta")).unwrap();
        registry.discard(&slot).unwrap();
        assert!(!registry.contains("beta"));
    }

    #[tokio::test]
    async fn test_upsert_rules() {
        let registry = ModuleRegistry::new();
        let slot = registry.acquire("alpha").await;
        registry.upsert_discovered(&slot, descriptor("alpha")).unwrap();
        assert_eq!(
            registry.upsert_discovered(&slot, descriptor("alpha")).unwrap(),
            UpsertOutcome::Unchanged
        );

        let mut newer = descriptor("alpha");
        newer.version = "1.1.0".into();
        assert_eq!(
            registry.upsert_discovered(&slot, newer.clone()).unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(registry.get("alpha").unwrap().descriptor.version, "1.1.0");

        let mut elsewhere = descriptor("alpha");
        elsewhere.manifest_path = PathBuf::from("/plugins/copy/manifest.json");
        assert!(matches!(
            registry.upsert_discovered(&slot, elsewhere),
            Err(ModuleError::Conflict { .. })
        ));

        assert!(matches!(
            registry.upsert_discovered(&slot, descriptor("beta")),
            Err(ModuleError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_try_acquire_conflicts_while_held() {
        let registry = ModuleRegistry::new();
        let slot = registry.try_acquire("alpha").unwrap();
        assert!(registry.is_busy("alpha"));

        let err = registry.try_acquire("alpha").unwrap_err();
        assert!(matches!(err, ModuleError::Conflict { .. }));
        assert!(err.is_retryable());

        // other ids are independent
        let _beta = registry.try_acquire("beta").unwrap();

        drop(slot);
        assert!(!registry.is_busy("alpha"));
        assert!(registry.try_acquire("alpha").is_ok());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let registry = Arc::new(ModuleRegistry::new());
        let slot = registry.acquire("alpha").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let slot = registry.acquire("alpha").await;
                registry.upsert_discovered(&slot, descriptor("alpha")).unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(slot);
        assert_eq!(waiter.await.unwrap(), UpsertOutcome::Inserted);
        assert!(registry.slots.lock().is_empty());
    }

    #[tokio::test]
    async fn test_slot_from_other_registry_is_rejected() {
        let registry = ModuleRegistry::new();
        let other = ModuleRegistry::new();
        let foreign = other.acquire("alpha").await;
        assert!(matches!(
            registry.upsert_discovered(&foreign, descriptor("alpha")),
            Err(ModuleError::Conflict { .. })
        ));
        assert!(!registry.contains("alpha"));
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_across_mutation() {
        let registry = ModuleRegistry::new();
        installed(&registry, "alpha").await;
        let before = registry.snapshot();

        let slot = registry.acquire("alpha").await;
        registry.set_enabled(&slot, false).unwrap();

        assert_eq!(before["alpha"].state, ModuleState::Enabled);
        assert_eq!(registry.snapshot()["alpha"].state, ModuleState::Disabled);
    }

    #[tokio::test]
    async fn test_events_and_stats() {
        let registry = ModuleRegistry::new();
        let mut events = registry.subscribe();
        installed(&registry, "alpha").await;

        let slot = registry.acquire("beta").await;
        registry.upsert_discovered(&slot, descriptor("beta")).unwrap();
        drop(slot);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen[..3],
            [
                RegistryEvent::StateChanged {
                    id: "alpha".into(),
                    from: None,
                    to: ModuleState::Discovered
                },
                RegistryEvent::StateChanged {
                    id: "alpha".into(),
                    from: Some(ModuleState::Discovered),
                    to: ModuleState::Installing
                },
                RegistryEvent::StateChanged {
                    id: "alpha".into(),
                    from: Some(ModuleState::Installing),
                    to: ModuleState::Enabled
                },
            ]
        );
        assert_eq!(seen.len(), 4);

        let stats = registry.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.enabled, 1);
        assert_eq!(stats.discovered, 1);
    }

    #[tokio::test]
    async fn test_find_by_dir() {
        let registry = ModuleRegistry::new();
        installed(&registry, "alpha").await;
        assert_eq!(
            registry
                .find_by_dir(Path::new("/plugins/alpha"))
                .map(|r| r.descriptor.id),
            Some("alpha".to_string())
        );
        assert!(registry.find_by_dir(Path::new("/plugins/beta")).is_none());
    }

    #[tokio::test]
    async fn test_recover_interrupted_skips_live_mutations() {
        let registry = ModuleRegistry::new();
        for id in ["alpha", "beta"] {
            let slot = registry.acquire(id).await;
            registry.upsert_discovered(&slot, descriptor(id)).unwrap();
            registry.transition_to_installing(&slot).unwrap();
        }

        let _live = registry.acquire("beta").await;
        assert_eq!(registry.recover_interrupted(), vec!["alpha".to_string()]);
        assert_eq!(registry.get("alpha").unwrap().state, ModuleState::Discovered);
        assert_eq!(registry.get("beta").unwrap().state, ModuleState::Installing);
    }
}
