//! Persistence adapter: loading and saving collection snapshots.
//!
//! Snapshots are whole-collection canonical JSON documents written through
//! the narrow [`Storage`] trait. Loading is where a collection's lifecycle
//! is assembled, in a fixed order: bind the storage location, decode and
//! validate the elements, run any structural migration, attach the mutation
//! watchers that re-save the snapshot when a stored element changes, and
//! finally promote the collection to shared.
//!
//! Durability is deliberately coarse: every committed mutation re-saves the
//! whole snapshot.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use reef_store::Storage;
use reef_types::{ResourceUrl, StoragePath};
use reef_value::{codec, ObjectValue, Value, ValueError};

use crate::error::{CollectionError, Result};
use crate::map::{MapCollection, MapConfig, MapEntry, MapInner};
use crate::migrate::{Migratable, MigrationHandlers, MigrationOutcome};
use crate::set::{Set, SetConfig, SetInner};
use crate::thread::{Thread, ThreadConfig, ThreadInner};

/// Storage binding of a persisted collection: the handle it writes through,
/// the path of its snapshot, and its resolved resource URL.
pub(crate) struct Binding {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) path: StoragePath,
    pub(crate) url: ResourceUrl,
}

/// Parameters shared by all loaders.
pub struct LoadParams {
    pub storage: Arc<dyn Storage>,
    pub path: StoragePath,
    /// Treat a missing snapshot as an empty collection instead of an error.
    /// This is how a fresh persisted collection is created.
    pub allow_missing: bool,
}

impl LoadParams {
    pub fn new(storage: Arc<dyn Storage>, path: StoragePath, allow_missing: bool) -> Self {
        Self {
            storage,
            path,
            allow_missing,
        }
    }
}

/// Result of loading a collection, after any migration ran.
pub enum LoadOutcome<C> {
    /// The collection loaded (and possibly migrated in place).
    Loaded(C),
    /// A migration replaced the whole collection with another value; the
    /// caller decides what to store in its place.
    Replaced(Value),
    /// A migration deleted the whole collection.
    Deleted,
}

impl<C> LoadOutcome<C> {
    /// The loaded collection; `None` if a migration replaced or deleted it.
    pub fn into_loaded(self) -> Option<C> {
        match self {
            LoadOutcome::Loaded(c) => Some(c),
            _ => None,
        }
    }
}

impl<C> fmt::Debug for LoadOutcome<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded(_) => f.write_str("Loaded(..)"),
            LoadOutcome::Replaced(value) => f.debug_tuple("Replaced").field(value).finish(),
            LoadOutcome::Deleted => f.write_str("Deleted"),
        }
    }
}

/// Load a set from its stored snapshot.
pub fn load_set(
    params: LoadParams,
    config: SetConfig,
    handlers: Option<&MigrationHandlers>,
) -> Result<LoadOutcome<Set>> {
    let serialized = read_snapshot(&params)?;
    let set = Set::new(config)?;
    set.inner
        .bind_storage(params.storage.clone(), params.path.clone())?;

    for item in parse_array(&params.path, &serialized)? {
        let element = codec::from_json_value(item)
            .map_err(|e| corrupt(&params.path, e.to_string()))?;
        set.inner.add_unpersisted(element).map_err(|e| match e {
            CollectionError::UniquenessViolation { key } => {
                corrupt(&params.path, format!("duplicate element key: {key}"))
            }
            CollectionError::ShapeViolation => corrupt(
                &params.path,
                "stored element does not match the configured shape".to_owned(),
            ),
            other => other,
        })?;
    }

    if let Some(handlers) = handlers.filter(|h| !h.is_empty()) {
        match set.migrate(&params.path, handlers)? {
            MigrationOutcome::Deleted => return Ok(LoadOutcome::Deleted),
            MigrationOutcome::Replaced(value) => return Ok(LoadOutcome::Replaced(value)),
            MigrationOutcome::Kept => set.inner.persist_now()?,
        }
    }

    let stored: Vec<(String, Value)> = {
        let state = set.inner.lock_state();
        state
            .elements
            .iter()
            .filter(|(_, value)| value.is_mutable())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    };
    for (key, element) in stored {
        attach_set_element_watcher(&set.inner, key, &element);
    }

    set.share();
    debug!(path = %params.path, "loaded set");
    Ok(LoadOutcome::Loaded(set))
}

/// Load a map from its stored snapshot (a flat array alternating key and
/// value).
pub fn load_map(
    params: LoadParams,
    config: MapConfig,
    handlers: Option<&MigrationHandlers>,
) -> Result<LoadOutcome<MapCollection>> {
    let serialized = read_snapshot(&params)?;
    let map = MapCollection::new(config);
    map.inner
        .bind_storage(params.storage.clone(), params.path.clone())?;

    let items = parse_array(&params.path, &serialized)?;
    if items.len() % 2 != 0 {
        return Err(corrupt(
            &params.path,
            "map snapshot has an odd number of items".to_owned(),
        ));
    }
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        let key =
            codec::from_json_value(key).map_err(|e| corrupt(&params.path, e.to_string()))?;
        let value =
            codec::from_json_value(value).map_err(|e| corrupt(&params.path, e.to_string()))?;
        map.inner.insert_unpersisted(key, value).map_err(|e| match e {
            CollectionError::UniquenessViolation { key } => {
                corrupt(&params.path, format!("duplicate map key: {key}"))
            }
            CollectionError::ShapeViolation => corrupt(
                &params.path,
                "stored association does not match the configured shapes".to_owned(),
            ),
            other => other,
        })?;
    }

    if let Some(handlers) = handlers.filter(|h| !h.is_empty()) {
        match map.migrate(&params.path, handlers)? {
            MigrationOutcome::Deleted => return Ok(LoadOutcome::Deleted),
            MigrationOutcome::Replaced(value) => return Ok(LoadOutcome::Replaced(value)),
            MigrationOutcome::Kept => map.inner.persist_now()?,
        }
    }

    let stored: Vec<(String, Value)> = {
        let state = map.inner.lock_state();
        state
            .entries
            .iter()
            .filter(|(_, entry)| entry.value.is_mutable())
            .map(|(canonical, entry)| (canonical.clone(), entry.value.clone()))
            .collect()
    };
    for (canonical, value) in stored {
        attach_map_value_watcher(&map.inner, canonical, &value);
    }

    map.share();
    debug!(path = %params.path, "loaded map");
    Ok(LoadOutcome::Loaded(map))
}

/// Load a thread from its stored snapshot. Message identifiers are recovered
/// from each message's resource URL, so append order survives the roundtrip.
pub fn load_thread(
    params: LoadParams,
    config: ThreadConfig,
    handlers: Option<&MigrationHandlers>,
) -> Result<LoadOutcome<Thread>> {
    let serialized = read_snapshot(&params)?;
    let thread = Thread::new(config);
    thread
        .inner
        .bind_storage(params.storage.clone(), params.path.clone())?;
    let collection_url = params.storage.base_url().join_path(&params.path);

    for item in parse_array(&params.path, &serialized)? {
        let value = codec::from_json_value(item)
            .map_err(|e| corrupt(&params.path, e.to_string()))?;
        let Value::Object(message) = value else {
            return Err(corrupt(
                &params.path,
                "thread snapshot contains a non-object message".to_owned(),
            ));
        };
        let id = message
            .url()
            .and_then(|url| collection_url.child_suffix(url))
            .map(str::to_owned)
            .ok_or_else(|| {
                corrupt(
                    &params.path,
                    "stored message has no identifier URL".to_owned(),
                )
            })?;
        thread
            .inner
            .add_unpersisted(id, message)
            .map_err(|e| match e {
                CollectionError::ShapeViolation => corrupt(
                    &params.path,
                    "stored message does not match the configured shape".to_owned(),
                ),
                other => other,
            })?;
    }

    if let Some(handlers) = handlers.filter(|h| !h.is_empty()) {
        match thread.migrate(&params.path, handlers)? {
            MigrationOutcome::Deleted => return Ok(LoadOutcome::Deleted),
            MigrationOutcome::Replaced(value) => return Ok(LoadOutcome::Replaced(value)),
            MigrationOutcome::Kept => thread.inner.persist_now()?,
        }
    }

    let stored: Vec<(String, ObjectValue)> = {
        let state = thread.inner.lock_state();
        state
            .messages
            .iter()
            .map(|(id, message)| (id.clone(), message.clone()))
            .collect()
    };
    for (id, message) in stored {
        attach_thread_message_watcher(&thread.inner, id, message);
    }

    thread.share();
    debug!(path = %params.path, "loaded thread");
    Ok(LoadOutcome::Loaded(thread))
}

/// The objects at the top of a value, looking through tuples. Watching
/// these suffices: a mutation of a deeper object propagates to the object
/// holding it.
fn contained_objects(value: &Value) -> Vec<ObjectValue> {
    fn walk(value: &Value, out: &mut Vec<ObjectValue>) {
        match value {
            Value::Object(obj) => out.push(obj.clone()),
            Value::Tuple(items) => {
                for item in items {
                    walk(item, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(value, &mut out);
    out
}

/// Watch a stored set element: any mutation, anywhere inside it, re-saves
/// the snapshot. The watcher holds only a weak handle, so it expires with
/// the collection.
pub(crate) fn attach_set_element_watcher(inner: &Arc<SetInner>, key: String, element: &Value) {
    for obj in contained_objects(element) {
        let weak = Arc::downgrade(inner);
        let key = key.clone();
        let element = element.clone();
        obj.on_mutation(move |_| match weak.upgrade() {
            Some(inner) => inner.persist_after_element_mutation(&key, &element),
            None => false,
        });
    }
}

/// Watch a stored map value. See [`attach_set_element_watcher`].
pub(crate) fn attach_map_value_watcher(inner: &Arc<MapInner>, canonical: String, value: &Value) {
    for obj in contained_objects(value) {
        let weak = Arc::downgrade(inner);
        let canonical = canonical.clone();
        let value = value.clone();
        obj.on_mutation(move |_| match weak.upgrade() {
            Some(inner) => inner.persist_after_value_mutation(&canonical, &value),
            None => false,
        });
    }
}

/// Watch a stored thread message. See [`attach_set_element_watcher`].
pub(crate) fn attach_thread_message_watcher(
    inner: &Arc<ThreadInner>,
    id: String,
    message: ObjectValue,
) {
    let weak = Arc::downgrade(inner);
    let watched = message.clone();
    message.on_mutation(move |_| match weak.upgrade() {
        Some(inner) => inner.persist_after_message_mutation(&id, &watched),
        None => false,
    });
}

/// Save a set snapshot: a JSON array of elements.
pub(crate) fn save_snapshot(binding: &Binding, items: &[Value]) -> Result<()> {
    let json: Vec<serde_json::Value> = items
        .iter()
        .map(codec::to_json_value)
        .collect::<std::result::Result<_, _>>()?;
    let serialized = serde_json::to_string(&json).map_err(ValueError::from)?;
    binding.storage.set_serialized(&binding.path, &serialized)?;
    debug!(path = %binding.path, elements = items.len(), "persisted set snapshot");
    Ok(())
}

/// Save a map snapshot: a flat JSON array alternating key and value.
pub(crate) fn save_map_snapshot(binding: &Binding, entries: &[MapEntry]) -> Result<()> {
    let mut json = Vec::with_capacity(entries.len() * 2);
    for entry in entries {
        json.push(codec::to_json_value(&entry.key)?);
        json.push(codec::to_json_value(&entry.value)?);
    }
    let serialized = serde_json::to_string(&json).map_err(ValueError::from)?;
    binding.storage.set_serialized(&binding.path, &serialized)?;
    debug!(path = %binding.path, entries = entries.len(), "persisted map snapshot");
    Ok(())
}

/// Save a thread snapshot: a JSON array of messages in append order.
pub(crate) fn save_thread_snapshot(binding: &Binding, messages: &[ObjectValue]) -> Result<()> {
    let json: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| codec::to_json_value(&Value::Object(m.clone())))
        .collect::<std::result::Result<_, _>>()?;
    let serialized = serde_json::to_string(&json).map_err(ValueError::from)?;
    binding.storage.set_serialized(&binding.path, &serialized)?;
    debug!(path = %binding.path, messages = messages.len(), "persisted thread snapshot");
    Ok(())
}

fn read_snapshot(params: &LoadParams) -> Result<String> {
    match params.storage.get_serialized(&params.path)? {
        Some(serialized) => Ok(serialized),
        None if params.allow_missing => Ok("[]".to_owned()),
        None => Err(CollectionError::SnapshotNotFound {
            path: params.path.clone(),
        }),
    }
}

fn parse_array(path: &StoragePath, serialized: &str) -> Result<Vec<serde_json::Value>> {
    let json: serde_json::Value =
        serde_json::from_str(serialized).map_err(|e| corrupt(path, e.to_string()))?;
    match json {
        serde_json::Value::Array(items) => Ok(items),
        _ => Err(corrupt(path, "snapshot is not a JSON array".to_owned())),
    }
}

fn corrupt(path: &StoragePath, reason: String) -> CollectionError {
    CollectionError::CorruptSnapshot {
        path: path.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::MigrationHandler;
    use crate::uniqueness::UniquenessPolicy;
    use reef_store::{MemoryStorage, StorageRegistry};
    use reef_value::ShapePattern;

    fn storage() -> Arc<MemoryStorage> {
        let registry = StorageRegistry::new();
        Arc::new(
            MemoryStorage::open(&registry, ResourceUrl::parse("ldb://main").unwrap()).unwrap(),
        )
    }

    fn path(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    fn int_set_config() -> SetConfig {
        SetConfig::new(
            Arc::new(ShapePattern::Int),
            UniquenessPolicy::ByRepresentation,
        )
    }

    #[test]
    fn missing_snapshot_is_an_error_unless_allowed() {
        let storage = storage();
        let err = load_set(
            LoadParams::new(storage.clone(), path("/ints"), false),
            int_set_config(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::SnapshotNotFound { .. }));

        let outcome = load_set(
            LoadParams::new(storage, path("/ints"), true),
            int_set_config(),
            None,
        )
        .unwrap();
        let set = outcome.into_loaded().unwrap();
        assert!(set.is_shared());
        assert!(set.is_empty(None).unwrap());
    }

    #[test]
    fn fresh_persisted_set_saves_on_mutation() {
        let storage = storage();
        let set = load_set(
            LoadParams::new(storage.clone(), path("/ints"), true),
            int_set_config(),
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();

        set.add(None, Value::Int(3)).unwrap();
        assert_eq!(
            storage.get_serialized(&path("/ints")).unwrap(),
            Some("[3]".to_owned())
        );

        set.remove(None, &Value::Int(3)).unwrap();
        assert_eq!(
            storage.get_serialized(&path("/ints")).unwrap(),
            Some("[]".to_owned())
        );
    }

    #[test]
    fn set_roundtrip() {
        let storage = storage();
        {
            let set = load_set(
                LoadParams::new(storage.clone(), path("/ints"), true),
                int_set_config(),
                None,
            )
            .unwrap()
            .into_loaded()
            .unwrap();
            set.add(None, Value::Int(2)).unwrap();
            set.add(None, Value::Int(1)).unwrap();
        }

        let reloaded = load_set(
            LoadParams::new(storage, path("/ints"), false),
            int_set_config(),
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();
        assert!(reloaded.is_shared());
        let values: Vec<Value> = reloaded.iter(None).unwrap().collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn corrupt_snapshots_are_reported() {
        let storage = storage();
        storage.set_serialized(&path("/ints"), "not json").unwrap();
        let err = load_set(
            LoadParams::new(storage.clone(), path("/ints"), false),
            int_set_config(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::CorruptSnapshot { .. }));

        storage.set_serialized(&path("/dups"), "[1,1]").unwrap();
        let err = load_set(
            LoadParams::new(storage.clone(), path("/dups"), false),
            int_set_config(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::CorruptSnapshot { .. }));

        storage.set_serialized(&path("/str"), "[\"x\"]").unwrap();
        let err = load_set(
            LoadParams::new(storage, path("/str"), false),
            int_set_config(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::CorruptSnapshot { .. }));
    }

    #[test]
    fn mutating_a_stored_element_resaves_the_snapshot() {
        let storage = storage();
        let config = SetConfig::new(
            Arc::new(ShapePattern::object([("id", ShapePattern::Str)])),
            UniquenessPolicy::ByProperty("id".into()),
        );
        let obj = ObjectValue::from_entries([
            ("id", Value::Str("a".into())),
            ("n", Value::Int(1)),
        ])
        .unwrap();
        {
            let set = load_set(
                LoadParams::new(storage.clone(), path("/objs"), true),
                config.clone(),
                None,
            )
            .unwrap()
            .into_loaded()
            .unwrap();
            set.add(None, Value::Object(obj.clone())).unwrap();
        }

        let reloaded = load_set(
            LoadParams::new(storage.clone(), path("/objs"), false),
            config,
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();

        let element = reloaded.iter(None).unwrap().next().unwrap();
        element.as_object().unwrap().set("n", Value::Int(2)).unwrap();

        let stored = storage.get_serialized(&path("/objs")).unwrap().unwrap();
        assert!(stored.contains("\"n\":2"), "snapshot was not re-saved: {stored}");
    }

    #[test]
    fn load_outcome_debug_names_the_variant() {
        let outcome: LoadOutcome<Set> = LoadOutcome::Deleted;
        assert_eq!(format!("{outcome:?}"), "Deleted");
        let outcome: LoadOutcome<Set> = LoadOutcome::Replaced(Value::Int(1));
        assert_eq!(format!("{outcome:?}"), "Replaced(Int(1))");
    }

    #[test]
    fn mutating_a_nested_object_resaves_the_snapshot() {
        let storage = storage();
        let config = SetConfig::new(
            Arc::new(ShapePattern::object([("id", ShapePattern::Str)])),
            UniquenessPolicy::ByProperty("id".into()),
        );
        {
            let set = load_set(
                LoadParams::new(storage.clone(), path("/people"), true),
                config.clone(),
                None,
            )
            .unwrap()
            .into_loaded()
            .unwrap();
            let address =
                ObjectValue::from_entries([("city", Value::Str("paris".into()))]).unwrap();
            let person = ObjectValue::from_entries([
                ("id", Value::Str("a".into())),
                ("address", Value::Object(address)),
            ])
            .unwrap();
            set.add(None, Value::Object(person)).unwrap();
        }

        let reloaded = load_set(
            LoadParams::new(storage.clone(), path("/people"), false),
            config,
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();
        let element = reloaded.iter(None).unwrap().next().unwrap();
        let address = element.as_object().unwrap().get("address").unwrap();
        address
            .as_object()
            .unwrap()
            .set("city", Value::Str("lyon".into()))
            .unwrap();

        let stored = storage.get_serialized(&path("/people")).unwrap().unwrap();
        assert!(
            stored.contains("lyon"),
            "snapshot is stale after a nested mutation: {stored}"
        );
    }

    #[test]
    fn mutable_values_inside_tuples_are_watched() {
        let storage = storage();
        let config = MapConfig::new(Arc::new(ShapePattern::Str), Arc::new(ShapePattern::Any));
        let map = load_map(
            LoadParams::new(storage.clone(), path("/mixed"), true),
            config,
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();

        let obj = ObjectValue::from_entries([("n", Value::Int(1))]).unwrap();
        map.insert(
            None,
            Value::Str("a".into()),
            Value::Tuple(vec![Value::Int(0), Value::Object(obj.clone())]),
        )
        .unwrap();

        obj.set("n", Value::Int(2)).unwrap();
        let stored = storage.get_serialized(&path("/mixed")).unwrap().unwrap();
        assert!(
            stored.contains("\"n\":2"),
            "snapshot is stale after a tuple-wrapped mutation: {stored}"
        );
    }

    #[test]
    fn url_identified_elements_keep_their_identity() {
        let storage = storage();
        let config = SetConfig::new(Arc::new(ShapePattern::Any), UniquenessPolicy::ByUrl);
        let url = {
            let set = load_set(
                LoadParams::new(storage.clone(), path("/users"), true),
                config.clone(),
                None,
            )
            .unwrap()
            .into_loaded()
            .unwrap();
            let obj = ObjectValue::from_entries([("name", Value::Str("ada".into()))]).unwrap();
            set.add(None, Value::Object(obj.clone())).unwrap();
            obj.url().unwrap().clone()
        };

        let reloaded = load_set(
            LoadParams::new(storage, path("/users"), false),
            config,
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();
        let element = reloaded.iter(None).unwrap().next().unwrap();
        assert_eq!(element.as_object().unwrap().url(), Some(&url));
    }

    #[test]
    fn map_roundtrip_alternates_keys_and_values() {
        let storage = storage();
        let config = MapConfig::new(Arc::new(ShapePattern::Str), Arc::new(ShapePattern::Int));
        {
            let map = load_map(
                LoadParams::new(storage.clone(), path("/scores"), true),
                config.clone(),
                None,
            )
            .unwrap()
            .into_loaded()
            .unwrap();
            map.insert(None, Value::Str("a".into()), Value::Int(1))
                .unwrap();
        }
        assert_eq!(
            storage.get_serialized(&path("/scores")).unwrap(),
            Some("[\"a\",1]".to_owned())
        );

        let reloaded = load_map(
            LoadParams::new(storage, path("/scores"), false),
            config,
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();
        assert_eq!(
            reloaded.get(None, &Value::Str("a".into())).unwrap(),
            Some(Value::Int(1))
        );
    }

    #[test]
    fn odd_map_snapshot_is_corrupt() {
        let storage = storage();
        storage.set_serialized(&path("/scores"), "[\"a\"]").unwrap();
        let err = load_map(
            LoadParams::new(storage, path("/scores"), false),
            MapConfig::new(Arc::new(ShapePattern::Any), Arc::new(ShapePattern::Any)),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::CorruptSnapshot { .. }));
    }

    #[test]
    fn thread_roundtrip_preserves_append_order() {
        let storage = storage();
        let config = ThreadConfig::new(Arc::new(ShapePattern::object([(
            "text",
            ShapePattern::Str,
        )])));
        {
            let thread = load_thread(
                LoadParams::new(storage.clone(), path("/log"), true),
                config.clone(),
                None,
            )
            .unwrap()
            .into_loaded()
            .unwrap();
            for text in ["first", "second"] {
                let message =
                    ObjectValue::from_entries([("text", Value::Str(text.into()))]).unwrap();
                thread.add(None, message).unwrap();
            }
        }

        let reloaded = load_thread(
            LoadParams::new(storage, path("/log"), false),
            config,
            None,
        )
        .unwrap()
        .into_loaded()
        .unwrap();
        let texts: Vec<Value> = reloaded
            .iter(None)
            .unwrap()
            .map(|m| m.get("text").unwrap())
            .collect();
        assert_eq!(
            texts,
            vec![Value::Str("first".into()), Value::Str("second".into())]
        );
    }

    #[test]
    fn whole_collection_migration_short_circuits_the_load() {
        let storage = storage();
        storage.set_serialized(&path("/ints"), "[1,2]").unwrap();

        let mut handlers = MigrationHandlers::new();
        handlers.delete(
            crate::migrate::PathPattern::parse("/ints").unwrap(),
            None,
        );
        let outcome = load_set(
            LoadParams::new(storage.clone(), path("/ints"), false),
            int_set_config(),
            Some(&handlers),
        )
        .unwrap();
        assert!(matches!(outcome, LoadOutcome::Deleted));

        let mut handlers = MigrationHandlers::new();
        handlers.replace(
            crate::migrate::PathPattern::parse("/ints").unwrap(),
            MigrationHandler::Value(Value::Str("tombstone".into())),
        );
        let outcome = load_set(
            LoadParams::new(storage, path("/ints"), false),
            int_set_config(),
            Some(&handlers),
        )
        .unwrap();
        match outcome {
            LoadOutcome::Replaced(value) => assert_eq!(value, Value::Str("tombstone".into())),
            _ => panic!("expected a replacement outcome"),
        }
    }
}
