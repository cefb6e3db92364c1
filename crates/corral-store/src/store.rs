use std::any::TypeId;

use tracing::debug;

use corral_entity::{
    Entity, FieldState, Handle, Snapshot, SnapshotReader, SnapshotWriter,
};
use corral_graph::{deleter, inserter, GraphError, NodeId, ObjectGraph, PrototypeNode};
use corral_tx::{Action, ActionLog, Transaction, TxError, TxId};
use corral_types::{Identifier, Oid, ProxyKey};

use crate::backend::Backend;
use crate::error::{StoreError, StoreResult};

/// The object graph store.
///
/// Composes the live graph (prototype tree, proxy arena, relation
/// endpoints), the transaction stack, and an optional persistence
/// backend. All mutation funnels through this façade so that the
/// transaction log and backend observe every change.
///
/// The store is single-threaded by design: no internal locking, no
/// suspension points. Callers that share it across threads must
/// serialize access externally (one lock around the whole store, or
/// confinement to one thread with message passing).
pub struct Store {
    graph: ObjectGraph,
    transactions: Vec<Transaction>,
    next_tx: u64,
    backend: Option<Box<dyn Backend>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            graph: ObjectGraph::new(),
            transactions: Vec::new(),
            next_tx: 0,
            backend: None,
        }
    }

    /// Store wired to a persistence backend.
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register `T` as a root prototype under `name`.
    pub fn attach<T: Entity + Default>(&mut self, name: &str) -> StoreResult<()> {
        self.graph.attach_type::<T>(name, None)?;
        Ok(())
    }

    /// Register `T` as a child prototype of an attached parent; objects
    /// of `T` count into the parent's subtree segment.
    pub fn attach_child<T: Entity + Default>(&mut self, name: &str, parent: &str) -> StoreResult<()> {
        let parent_node = self.node_by_name(parent)?;
        self.graph.attach_type::<T>(name, Some(parent_node))?;
        Ok(())
    }

    /// Remove a prototype; `recursive` also removes child prototypes,
    /// otherwise children make the detach fail.
    pub fn detach(&mut self, name: &str, recursive: bool) -> StoreResult<()> {
        let node = self.node_by_name(name)?;
        self.graph.detach(node, recursive)?;
        Ok(())
    }

    fn node_by_name(&self, name: &str) -> StoreResult<NodeId> {
        self.graph
            .tree
            .find_by_name(name)
            .ok_or_else(|| GraphError::UnknownType(name.to_string()).into())
    }

    fn node_of<T: Entity>(&self) -> StoreResult<NodeId> {
        self.graph
            .tree
            .find_by_type(TypeId::of::<T>())
            .ok_or_else(|| GraphError::UnknownType(std::any::type_name::<T>().to_string()).into())
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert an object graph rooted at `value`, cascading into detached
    /// related objects. Under a transaction every registration is
    /// logged; otherwise the backend hears about each new row
    /// immediately.
    pub fn insert<T: Entity>(&mut self, value: T) -> StoreResult<Handle<T>> {
        let report = inserter::insert(&mut self.graph, Box::new(value))?;
        if self.transactions.is_empty() {
            if self.backend.is_some() {
                let mut rows = Vec::with_capacity(report.created.len());
                for &(_, key) in &report.created {
                    rows.push(self.row_for(key)?);
                }
                if let Some(backend) = self.backend.as_mut() {
                    for (name, pk, row) in &rows {
                        backend.on_insert(name, pk, row)?;
                    }
                }
            }
        } else {
            let tx = self
                .transactions
                .last_mut()
                .expect("checked transaction branch");
            tx.log_mut().record_insert(&report.created)?;
        }
        Ok(Handle::new(report.root))
    }

    /// Mutate a stored object in place.
    ///
    /// Under a transaction the first touch of an object backs up its
    /// pre-mutation field state; later touches reuse that backup.
    /// Relation holders must not be rewired through `modify` — the
    /// endpoint cascade only runs at insert/remove time.
    pub fn modify<T: Entity, R>(
        &mut self,
        handle: Handle<T>,
        mutate: impl FnOnce(&mut T) -> R,
    ) -> StoreResult<R> {
        let key = handle.key();
        let Some(proxy) = self.graph.arena.proxy(key) else {
            return Err(GraphError::ProxyNotFound(key).into());
        };
        let oid = proxy.oid;

        let needs_backup = self
            .transactions
            .last()
            .is_some_and(|tx| tx.log().action_for(oid).is_none());
        if needs_backup {
            let (_, _, row) = self.row_for(key)?;
            let tx = self
                .transactions
                .last_mut()
                .expect("backup implies an active transaction");
            tx.log_mut().record_update(oid, key, || row);
        }

        let result = {
            let proxy = self
                .graph
                .arena
                .proxy_mut(key)
                .expect("checked live proxy");
            let Some(payload) = proxy.payload_mut() else {
                return Err(GraphError::ProxyNotFound(key).into());
            };
            let Some(value) = payload.downcast_mut::<T>() else {
                return Err(StoreError::WrongType(oid));
            };
            mutate(value)
        };

        if self.transactions.is_empty() && self.backend.is_some() {
            let (name, pk, row) = self.row_for(key)?;
            if let Some(backend) = self.backend.as_mut() {
                backend.on_update(&name, &pk, &row)?;
            }
        }
        Ok(result)
    }

    /// Remove an object and its delete-cascading subgraph.
    ///
    /// Fails with `ObjectInUse` — leaving the store untouched — if any
    /// member of the delete set is still referenced from outside it.
    pub fn remove<T: Entity>(&mut self, handle: Handle<T>) -> StoreResult<()> {
        self.remove_key(handle.key())
    }

    /// Untyped variant of [`remove`](Self::remove).
    pub fn remove_key(&mut self, key: ProxyKey) -> StoreResult<()> {
        let plan = deleter::plan(&mut self.graph, key)?;

        if self.transactions.is_empty() {
            let mut meta = Vec::new();
            if self.backend.is_some() {
                for &(_, victim) in plan.victims() {
                    let proxy = self
                        .graph
                        .arena
                        .proxy(victim)
                        .expect("planned victim is live");
                    let name = self.graph.tree.node(proxy.node).name.clone();
                    meta.push((name, proxy.pk.clone()));
                }
            }
            deleter::execute(&mut self.graph, plan)?;
            if let Some(backend) = self.backend.as_mut() {
                for (name, pk) in &meta {
                    backend.on_delete(name, pk)?;
                }
            }
        } else {
            let mut entries = Vec::with_capacity(plan.victims().len());
            for &(oid, victim) in plan.victims() {
                let (name, pk, row) = self.row_for(victim)?;
                entries.push((oid, victim, name, pk, row));
            }
            let tx = self
                .transactions
                .last_mut()
                .expect("checked transaction branch");
            for (oid, victim, name, pk, row) in entries {
                tx.log_mut().record_delete(oid, victim, &name, pk, || row)?;
            }
            deleter::execute(&mut self.graph, plan)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup & iteration
    // -----------------------------------------------------------------------

    /// Borrow a stored object. `None` for stale handles, ghosts, and
    /// type mismatches.
    pub fn get<T: Entity>(&self, handle: Handle<T>) -> Option<&T> {
        self.graph
            .arena
            .proxy(handle.key())?
            .payload()?
            .downcast_ref::<T>()
    }

    /// O(1) identity lookup by store-assigned oid.
    pub fn find_by_oid(&self, oid: Oid) -> Option<ProxyKey> {
        self.graph.find_by_oid(oid)
    }

    /// Look up an object of exactly `T` by primary key.
    pub fn find_by_pk<T: Entity>(&self, pk: &Identifier) -> Option<Handle<T>> {
        let node = self.graph.tree.find_by_type(TypeId::of::<T>())?;
        self.graph.tree.node(node).find_by_pk(pk).map(Handle::new)
    }

    /// Number of live objects in the store, ghosts included.
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Objects of exactly `T`.
    pub fn count_of<T: Entity>(&self) -> StoreResult<usize> {
        Ok(self.graph.tree.node(self.node_of::<T>()?).len())
    }

    /// Objects of `T` and every descendant prototype.
    pub fn subtree_count_of<T: Entity>(&self) -> StoreResult<usize> {
        Ok(self.graph.tree.subtree_count(self.node_of::<T>()?))
    }

    /// Internal holders currently pointing at an object.
    pub fn holder_count(&self, key: ProxyKey) -> Option<i64> {
        self.graph.holder_count(key)
    }

    /// Visit every root prototype node.
    pub fn for_each_root_node(&self, mut visit: impl FnMut(&PrototypeNode)) {
        for &root in self.graph.tree.roots() {
            visit(self.graph.tree.node(root));
        }
    }

    /// Visit every object of exactly `T`, in partition order.
    pub fn for_each<T: Entity>(
        &self,
        mut visit: impl FnMut(Handle<T>, &T),
    ) -> StoreResult<()> {
        let node = self.node_of::<T>()?;
        for key in self.graph.tree.own_keys(&self.graph.arena, node) {
            if let Some(value) = self
                .graph
                .arena
                .proxy(key)
                .and_then(|proxy| proxy.payload())
                .and_then(|payload| payload.downcast_ref::<T>())
            {
                visit(Handle::new(key), value);
            }
        }
        Ok(())
    }

    /// Visit every object of a named prototype and its descendants, in
    /// partition order, type-erased.
    pub fn for_each_in_subtree(
        &self,
        name: &str,
        mut visit: impl FnMut(ProxyKey, &dyn Entity),
    ) -> StoreResult<()> {
        let node = self.node_by_name(name)?;
        for key in self.graph.tree.subtree_keys(&self.graph.arena, node) {
            if let Some(payload) = self.graph.arena.proxy(key).and_then(|proxy| proxy.payload()) {
                visit(key, payload);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Open a transaction. Transactions nest on a stack; only the most
    /// recently begun one accepts commit or rollback.
    pub fn begin(&mut self) -> TxId {
        self.next_tx += 1;
        let id = TxId::new(self.next_tx);
        self.transactions.push(Transaction::new(id));
        debug!(%id, depth = self.transactions.len(), "transaction begun");
        id
    }

    /// Id of the current (top-of-stack) transaction.
    pub fn current_transaction(&self) -> Option<TxId> {
        self.transactions.last().map(Transaction::id)
    }

    /// Make the transaction's work permanent. An inner commit merges its
    /// log into the parent; the outermost commit flushes the folded log
    /// to the backend. Committing an empty transaction is a no-op.
    pub fn commit(&mut self, id: TxId) -> StoreResult<()> {
        self.check_current(id)?;
        let tx = self
            .transactions
            .pop()
            .expect("checked current transaction");
        let log = tx.into_log();
        if self.transactions.is_empty() {
            self.flush(log)?;
        } else {
            let parent = self
                .transactions
                .last_mut()
                .expect("checked nesting branch");
            parent.log_mut().merge(log)?;
        }
        debug!(%id, "transaction committed");
        Ok(())
    }

    /// Undo everything the transaction logged, in reverse order, then
    /// close it. Rolling back an empty transaction is a no-op.
    pub fn rollback(&mut self, id: TxId) -> StoreResult<()> {
        self.check_current(id)?;
        let tx = self
            .transactions
            .pop()
            .expect("checked current transaction");
        let actions = tx.into_log().into_actions();
        for action in actions.into_iter().rev() {
            self.undo(action)?;
        }
        debug!(%id, "transaction rolled back");
        Ok(())
    }

    fn check_current(&self, id: TxId) -> StoreResult<()> {
        let Some(top) = self.transactions.last() else {
            return Err(TxError::NoTransaction.into());
        };
        if top.id() != id {
            return Err(TxError::NotCurrentTransaction.into());
        }
        Ok(())
    }

    /// Push a committed outermost log to the backend. Cancelled-out
    /// work (inserted and deleted within the transaction) never appears
    /// here.
    fn flush(&mut self, log: ActionLog) -> StoreResult<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        for action in log.into_actions() {
            match action {
                Action::Insert { objects } => {
                    for (_, key) in objects {
                        let (name, pk, row) = self.row_for(key)?;
                        if let Some(backend) = self.backend.as_mut() {
                            backend.on_insert(&name, &pk, &row)?;
                        }
                    }
                }
                Action::Update { key, .. } => {
                    let (name, pk, row) = self.row_for(key)?;
                    if let Some(backend) = self.backend.as_mut() {
                        backend.on_update(&name, &pk, &row)?;
                    }
                }
                Action::Delete { node_name, pk, .. } => {
                    if let Some(backend) = self.backend.as_mut() {
                        backend.on_delete(&node_name, &pk)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reverse one logged action.
    fn undo(&mut self, action: Action) -> StoreResult<()> {
        match action {
            Action::Insert { objects } => {
                for &(_, key) in objects.iter().rev() {
                    deleter::force_remove(&mut self.graph, key)?;
                }
            }
            Action::Update { key, mut backup, .. } => {
                let Some(proxy) = self.graph.arena.proxy(key) else {
                    return Err(GraphError::ProxyNotFound(key).into());
                };
                let node = proxy.node;
                self.resolve_refs(node, &mut backup);
                let Some(mut payload) = self.graph.arena.take_payload(key) else {
                    return Err(GraphError::ProxyNotFound(key).into());
                };
                let restored = SnapshotReader::restore(payload.as_mut(), backup);
                self.graph.arena.put_payload(key, payload);
                restored?;
            }
            Action::Delete {
                oid,
                node_name,
                pk,
                mut backup,
                ..
            } => {
                let node = self
                    .graph
                    .tree
                    .find_by_name(&node_name)
                    .ok_or(GraphError::UnknownType(node_name))?;
                self.resolve_refs(node, &mut backup);
                let mut entity = self.graph.tree.node(node).produce();
                backup.pk = pk.clone();
                SnapshotReader::restore_uncounted(entity.as_mut(), backup)?;
                let key = self.graph.restore_object(node, oid, pk, entity)?;
                inserter::rewire(&mut self.graph, key)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backend plumbing
    // -----------------------------------------------------------------------

    /// Capture an object as a primary-key-based row: the backend (and
    /// the transaction log) never see arena keys, so rows survive
    /// restarts and rollback can resolve references even after slots
    /// were recycled.
    fn row_for(&mut self, key: ProxyKey) -> StoreResult<(String, Identifier, Snapshot)> {
        let Some(proxy) = self.graph.arena.proxy(key) else {
            return Err(GraphError::ProxyNotFound(key).into());
        };
        let (node, pk) = (proxy.node, proxy.pk.clone());
        let node_name = self.graph.tree.node(node).name.clone();

        let mut snapshot = match self.graph.arena.take_payload(key) {
            Some(mut payload) => {
                let snapshot = SnapshotWriter::capture(payload.as_mut());
                self.graph.arena.put_payload(key, payload);
                snapshot
            }
            // a ghost's row is identity only
            None => Snapshot::new(node_name.clone()),
        };
        snapshot.pk = pk.clone();

        for (_, state) in snapshot.fields.iter_mut() {
            match state {
                FieldState::Reference(Some(entry)) => {
                    entry.pk = self.pk_of(entry.key);
                    entry.key = None;
                }
                FieldState::Container(entries) => {
                    for entry in entries.iter_mut() {
                        entry.pk = self.pk_of(entry.key);
                        entry.key = None;
                    }
                }
                _ => {}
            }
        }
        Ok((node_name, pk, snapshot))
    }

    fn pk_of(&self, key: Option<ProxyKey>) -> Identifier {
        key.and_then(|key| self.graph.arena.proxy(key))
            .map(|proxy| proxy.pk.clone())
            .unwrap_or(Identifier::Unset)
    }

    /// Resolve a pk-based snapshot's references back to live keys,
    /// creating ghost proxies for targets that do not exist yet.
    fn resolve_refs(&mut self, node: NodeId, snapshot: &mut Snapshot) {
        let relations: Vec<(String, TypeId)> = self
            .graph
            .tree
            .node(node)
            .shape
            .relations
            .iter()
            .map(|relation| (relation.name.clone(), relation.target))
            .collect();

        for (name, target) in relations {
            let Some(target_node) = self.graph.tree.find_by_type(target) else {
                continue;
            };
            let Some(state) = snapshot.field_mut(&name) else {
                continue;
            };
            match state {
                FieldState::Reference(Some(entry)) => {
                    if entry.pk.is_set() {
                        entry.key = Some(self.graph.ensure_by_pk(target_node, entry.pk.clone()));
                    }
                }
                FieldState::Container(entries) => {
                    for entry in entries.iter_mut() {
                        if entry.pk.is_set() {
                            entry.key =
                                Some(self.graph.ensure_by_pk(target_node, entry.pk.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Pull every row of `T` from the backend into the store.
    ///
    /// Rows fill existing ghost proxies in place; forward references
    /// create new ghosts that later loads fill. Loading bypasses the
    /// transaction log — it replays persisted state, it does not mutate
    /// it. Returns the number of rows materialized.
    pub fn load<T: Entity>(&mut self) -> StoreResult<usize> {
        let node = self.node_of::<T>()?;
        let node_name = self.graph.tree.node(node).name.clone();
        let Some(backend) = self.backend.as_mut() else {
            return Ok(0);
        };
        let rows = backend.select(&node_name)?;

        let mut loaded = 0;
        for (pk, mut row) in rows {
            self.resolve_refs(node, &mut row);
            row.pk = pk.clone();

            let existing = self.graph.tree.node(node).find_by_pk(&pk);
            let key = match existing {
                Some(key) => {
                    let ghost = self
                        .graph
                        .arena
                        .proxy(key)
                        .is_some_and(|proxy| proxy.is_ghost());
                    if !ghost {
                        // already materialized in this session
                        continue;
                    }
                    let mut entity = self.graph.tree.node(node).produce();
                    SnapshotReader::restore_uncounted(entity.as_mut(), row)?;
                    self.graph.fill_ghost(key, entity)?;
                    key
                }
                None => {
                    let mut entity = self.graph.tree.node(node).produce();
                    SnapshotReader::restore_uncounted(entity.as_mut(), row)?;
                    self.graph.register(entity)?
                }
            };
            inserter::rewire(&mut self.graph, key)?;
            loaded += 1;
        }
        debug!(node = %node_name, loaded, "rows loaded");
        Ok(loaded)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("objects", &self.graph.len())
            .field("open_transactions", &self.transactions.len())
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::InMemoryBackend;
    use corral_entity::{BelongsTo, Cascade, FieldVisitor, HasMany, HasOne, JoinEntity};
    use corral_types::Value;

    // -----------------------------------------------------------------------
    // Test entities
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct Album {
        id: Identifier,
        name: String,
        tracks: HasMany<Track>,
    }

    #[derive(Default)]
    struct Track {
        id: Identifier,
        title: String,
        length: i64,
        album: BelongsTo<Album>,
    }

    impl Entity for Album {
        fn type_name(&self) -> &'static str {
            "album"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("name", &mut self.name);
            visitor.on_has_many("tracks", &mut self.tracks, Cascade::All);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl Entity for Track {
        fn type_name(&self) -> &'static str {
            "track"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("title", &mut self.title);
            visitor.on_attribute("length", &mut self.length);
            visitor.on_belongs_to("album", &mut self.album, Cascade::None);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[derive(Default)]
    struct Person {
        id: Identifier,
        name: String,
    }

    #[derive(Default)]
    struct Student {
        id: Identifier,
        name: String,
        school: String,
    }

    impl Entity for Person {
        fn type_name(&self) -> &'static str {
            "person"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("name", &mut self.name);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl Entity for Student {
        fn type_name(&self) -> &'static str {
            "student"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("name", &mut self.name);
            visitor.on_attribute("school", &mut self.school);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[derive(Default)]
    struct Owner {
        id: Identifier,
        name: String,
        pet: HasOne<Pet>,
    }

    #[derive(Default)]
    struct Pet {
        id: Identifier,
        name: String,
    }

    impl Entity for Owner {
        fn type_name(&self) -> &'static str {
            "owner"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("name", &mut self.name);
            // insert the pet with its owner, never delete it
            visitor.on_has_one("pet", &mut self.pet, Cascade::Insert);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl Entity for Pet {
        fn type_name(&self) -> &'static str {
            "pet"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("name", &mut self.name);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[derive(Default)]
    struct Course {
        id: Identifier,
        title: String,
        students: HasMany<JoinEntity<Scholar, Course>>,
    }

    #[derive(Default)]
    struct Scholar {
        id: Identifier,
        name: String,
        courses: HasMany<JoinEntity<Scholar, Course>>,
    }

    impl Entity for Course {
        fn type_name(&self) -> &'static str {
            "course"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("title", &mut self.title);
            visitor.on_has_many("students", &mut self.students, Cascade::All);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl Entity for Scholar {
        fn type_name(&self) -> &'static str {
            "scholar"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("name", &mut self.name);
            visitor.on_has_many("courses", &mut self.courses, Cascade::All);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn music_store() -> Store {
        let mut store = Store::new();
        store.attach::<Album>("album").unwrap();
        store.attach::<Track>("track").unwrap();
        store
    }

    fn music_store_with_backend() -> (Store, Rc<RefCell<InMemoryBackend>>) {
        let backend = Rc::new(RefCell::new(InMemoryBackend::new()));
        let mut store = Store::with_backend(Box::new(Rc::clone(&backend)));
        store.attach::<Album>("album").unwrap();
        store.attach::<Track>("track").unwrap();
        (store, backend)
    }

    fn album(name: &str, titles: &[&str]) -> Album {
        let mut album = Album {
            name: name.into(),
            ..Album::default()
        };
        for title in titles {
            album.tracks.push(Track {
                title: (*title).into(),
                length: 180,
                ..Track::default()
            });
        }
        album
    }

    // -----------------------------------------------------------------------
    // Registration & lookup
    // -----------------------------------------------------------------------

    #[test]
    fn person_student_partition_counts() {
        let mut store = Store::new();
        store.attach::<Person>("person").unwrap();
        store.attach_child::<Student>("student", "person").unwrap();

        for n in 0..3 {
            store.insert(Person {
                name: format!("p{n}"),
                ..Person::default()
            })
            .unwrap();
        }
        for n in 0..2 {
            store.insert(Student {
                name: format!("s{n}"),
                ..Student::default()
            })
            .unwrap();
        }

        assert_eq!(store.subtree_count_of::<Person>().unwrap(), 5);
        assert_eq!(store.count_of::<Person>().unwrap(), 3);
        assert_eq!(store.count_of::<Student>().unwrap(), 2);
    }

    #[test]
    fn attach_child_of_unknown_parent_fails() {
        let mut store = Store::new();
        let err = store.attach_child::<Student>("student", "person").unwrap_err();
        assert!(matches!(err, StoreError::Graph(GraphError::UnknownType(_))));
    }

    #[test]
    fn detach_with_children_fails_without_recursive() {
        let mut store = Store::new();
        store.attach::<Person>("person").unwrap();
        store.attach_child::<Student>("student", "person").unwrap();

        let err = store.detach("person", false).unwrap_err();
        assert!(matches!(err, StoreError::Graph(GraphError::TypeInUse(_))));
        store.detach("person", true).unwrap();
    }

    #[test]
    fn insert_get_and_find() {
        let mut store = music_store();
        let handle = store.insert(album("ok computer", &[])).unwrap();

        assert_eq!(store.get(handle).unwrap().name, "ok computer");
        assert_eq!(store.len(), 1);

        let pk = store.get(handle).unwrap().id.clone();
        assert_eq!(store.find_by_pk::<Album>(&pk), Some(handle));
    }

    #[test]
    fn get_with_wrong_type_is_none() {
        let mut store = music_store();
        let handle = store.insert(album("a", &[])).unwrap();
        let wrong: Handle<Track> = Handle::new(handle.key());
        assert!(store.get(wrong).is_none());
    }

    #[test]
    fn for_each_visits_partition_in_order() {
        let mut store = music_store();
        store.insert(album("a", &[])).unwrap();
        store.insert(album("b", &[])).unwrap();
        store.insert(album("c", &["t"])).unwrap();

        let mut names = Vec::new();
        store
            .for_each::<Album>(|_, value| names.push(value.name.clone()))
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);

        let mut roots = 0;
        store.for_each_root_node(|_| roots += 1);
        assert_eq!(roots, 2);
    }

    // -----------------------------------------------------------------------
    // Relations through the store
    // -----------------------------------------------------------------------

    #[test]
    fn appending_track_wires_back_reference() {
        let mut store = music_store();
        let handle = store.insert(album("moss", &["one", "two"])).unwrap();

        let album = store.get(handle).unwrap();
        let track_keys: Vec<_> = album.tracks.iter_keys().collect();
        assert_eq!(track_keys.len(), 2);

        for key in track_keys {
            let track: Handle<Track> = Handle::new(key);
            assert_eq!(store.get(track).unwrap().album.key(), Some(handle.key()));
        }
    }

    #[test]
    fn remove_referenced_object_fails_and_leaves_store() {
        let mut store = Store::new();
        store.attach::<Owner>("owner").unwrap();
        store.attach::<Pet>("pet").unwrap();

        let owner = store
            .insert(Owner {
                pet: HasOne::with(Pet::default()),
                ..Owner::default()
            })
            .unwrap();
        let pet_key = store.get(owner).unwrap().pet.key().unwrap();
        let before = store.len();

        // the pet has no back-reference; its holder is invisible from
        // its own fields, so the delete must be refused
        let err = store.remove_key(pet_key).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Graph(GraphError::ObjectInUse { .. })
        ));
        assert_eq!(store.len(), before);
        assert_eq!(store.holder_count(pet_key), Some(1));

        // removing the owner releases the reference; the pet becomes
        // deletable afterwards (the recoverable-retry path)
        store.remove(owner).unwrap();
        assert_eq!(store.holder_count(pet_key), Some(0));
        store.remove_key(pet_key).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn cascade_remove_deletes_subgraph() {
        let mut store = music_store();
        let handle = store.insert(album("m", &["t1", "t2"])).unwrap();
        assert_eq!(store.len(), 3);

        store.remove(handle).unwrap();
        assert!(store.is_empty());
        assert!(store.get(handle).is_none());
    }

    #[test]
    fn many_to_many_through_join_entities() {
        let mut store = Store::new();
        store.attach::<Scholar>("scholar").unwrap();
        store.attach::<Course>("course").unwrap();
        store
            .attach::<JoinEntity<Scholar, Course>>("scholar_course")
            .unwrap();

        let course = store
            .insert(Course {
                title: "databases".into(),
                ..Course::default()
            })
            .unwrap();

        let mut scholar = Scholar {
            name: "grace".into(),
            ..Scholar::default()
        };
        scholar.courses.push(JoinEntity::to_key(course.key()));
        let scholar = store.insert(scholar).unwrap();

        // scholar, course, join
        assert_eq!(store.len(), 3);

        // the join's left half was wired by the container mirror
        let join_key = store
            .get(scholar)
            .unwrap()
            .courses
            .iter_keys()
            .next()
            .unwrap();
        let join: Handle<JoinEntity<Scholar, Course>> = Handle::new(join_key);
        let join_ref = store.get(join).unwrap();
        assert_eq!(join_ref.left.key(), Some(scholar.key()));
        assert_eq!(join_ref.right.key(), Some(course.key()));

        // the course's container observed the join through the mirror
        assert_eq!(
            store.get(course).unwrap().students.iter_keys().next(),
            Some(join_key)
        );

        // deleting the scholar cascades into the join but not the course
        store.remove(scholar).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(course).unwrap().students.is_empty());
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn empty_transaction_commit_and_rollback_are_noops() {
        let mut store = music_store();
        store.insert(album("a", &[])).unwrap();

        let tx = store.begin();
        store.commit(tx).unwrap();
        assert_eq!(store.len(), 1);

        let tx = store.begin();
        store.rollback(tx).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn commit_of_non_current_transaction_fails() {
        let mut store = music_store();
        let outer = store.begin();
        let _inner = store.begin();

        let err = store.commit(outer).unwrap_err();
        assert!(matches!(err, StoreError::Tx(TxError::NotCurrentTransaction)));

        let err = store.rollback(outer).unwrap_err();
        assert!(matches!(err, StoreError::Tx(TxError::NotCurrentTransaction)));
    }

    #[test]
    fn commit_without_transaction_fails() {
        let mut store = music_store();
        let tx = store.begin();
        store.commit(tx).unwrap();
        let err = store.commit(tx).unwrap_err();
        assert!(matches!(err, StoreError::Tx(TxError::NoTransaction)));
    }

    #[test]
    fn rollback_of_insert_removes_objects() {
        let mut store = music_store();
        let tx = store.begin();
        let handle = store.insert(album("m", &["t1", "t2"])).unwrap();
        assert_eq!(store.len(), 3);

        store.rollback(tx).unwrap();
        assert!(store.is_empty());
        assert!(store.get(handle).is_none());
    }

    #[test]
    fn rollback_of_modify_restores_fields() {
        let mut store = music_store();
        let handle = store.insert(album("original", &[])).unwrap();

        let tx = store.begin();
        store.modify(handle, |a| a.name = "changed".into()).unwrap();
        store.modify(handle, |a| a.name = "changed again".into()).unwrap();
        assert_eq!(store.get(handle).unwrap().name, "changed again");

        store.rollback(tx).unwrap();
        assert_eq!(store.get(handle).unwrap().name, "original");
    }

    #[test]
    fn commit_keeps_modifications() {
        let mut store = music_store();
        let handle = store.insert(album("original", &[])).unwrap();

        let tx = store.begin();
        store.modify(handle, |a| a.name = "committed".into()).unwrap();
        store.commit(tx).unwrap();
        assert_eq!(store.get(handle).unwrap().name, "committed");
    }

    #[test]
    fn delete_then_rollback_restores_object_with_fields() {
        let mut store = music_store();
        let handle = store.insert(album("keeper", &[])).unwrap();
        let oid = Oid::new(1);
        assert!(store.find_by_oid(oid).is_some());

        let tx = store.begin();
        store.remove(handle).unwrap();
        assert!(store.find_by_oid(oid).is_none());

        store.rollback(tx).unwrap();
        let key = store.find_by_oid(oid).expect("object restored");
        let restored: Handle<Album> = Handle::new(key);
        assert_eq!(store.get(restored).unwrap().name, "keeper");
    }

    #[test]
    fn cascade_delete_rollback_restores_relations() {
        let mut store = music_store();
        let handle = store.insert(album("m", &["t1", "t2"])).unwrap();
        let album_oid = Oid::new(1);

        let tx = store.begin();
        store.remove(handle).unwrap();
        assert!(store.is_empty());

        store.rollback(tx).unwrap();
        assert_eq!(store.len(), 3);

        let key = store.find_by_oid(album_oid).expect("album restored");
        let restored: Handle<Album> = Handle::new(key);
        let restored_album = store.get(restored).unwrap();
        assert_eq!(restored_album.tracks.len(), 2);

        // back-references and counts are rewired
        for track_key in restored_album.tracks.iter_keys().collect::<Vec<_>>() {
            let track: Handle<Track> = Handle::new(track_key);
            assert_eq!(store.get(track).unwrap().album.key(), Some(key));
            assert_eq!(store.holder_count(track_key), Some(1));
        }
        assert_eq!(store.holder_count(key), Some(2));
    }

    #[test]
    fn insert_and_delete_in_same_transaction_cancel_out() {
        let (mut store, backend) = music_store_with_backend();

        let tx = store.begin();
        let handle = store.insert(album("ephemeral", &[])).unwrap();
        store.remove(handle).unwrap();
        store.commit(tx).unwrap();

        assert!(store.is_empty());
        assert!(store.find_by_oid(Oid::new(1)).is_none());
        // the cancelled pair never reached the backend
        assert!(backend.borrow().is_empty());
    }

    #[test]
    fn nested_inner_commit_is_undone_by_outer_rollback() {
        let mut store = music_store();
        let handle = store.insert(album("original", &[])).unwrap();

        let outer = store.begin();
        let inner = store.begin();
        store.modify(handle, |a| a.name = "inner".into()).unwrap();
        store.commit(inner).unwrap();
        assert_eq!(store.get(handle).unwrap().name, "inner");

        store.rollback(outer).unwrap();
        assert_eq!(store.get(handle).unwrap().name, "original");
    }

    #[test]
    fn nested_inner_rollback_spares_outer_work() {
        let mut store = music_store();

        let outer = store.begin();
        let kept = store.insert(album("kept", &[])).unwrap();

        let inner = store.begin();
        let dropped = store.insert(album("dropped", &[])).unwrap();
        store.rollback(inner).unwrap();

        assert!(store.get(dropped).is_none());
        assert_eq!(store.get(kept).unwrap().name, "kept");

        store.commit(outer).unwrap();
        assert_eq!(store.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Backend
    // -----------------------------------------------------------------------

    #[test]
    fn untransacted_mutations_notify_backend_immediately() {
        let (mut store, backend) = music_store_with_backend();

        let handle = store.insert(album("a", &["t"])).unwrap();
        assert_eq!(backend.borrow().row_count("album"), 1);
        assert_eq!(backend.borrow().row_count("track"), 1);

        store.modify(handle, |a| a.name = "b".into()).unwrap();
        let pk = store.get(handle).unwrap().id.clone();
        let row = backend.borrow().row("album", &pk).cloned().unwrap();
        assert_eq!(
            row.field("name"),
            Some(&FieldState::Attribute(Value::from("b")))
        );

        store.remove(handle).unwrap();
        assert!(backend.borrow().is_empty());
    }

    #[test]
    fn transacted_work_reaches_backend_only_on_outermost_commit() {
        let (mut store, backend) = music_store_with_backend();

        let outer = store.begin();
        let inner = store.begin();
        store.insert(album("a", &[])).unwrap();
        store.commit(inner).unwrap();
        assert!(backend.borrow().is_empty());

        store.commit(outer).unwrap();
        assert_eq!(backend.borrow().row_count("album"), 1);
    }

    #[test]
    fn rolled_back_work_never_reaches_backend() {
        let (mut store, backend) = music_store_with_backend();

        let tx = store.begin();
        store.insert(album("a", &[])).unwrap();
        store.rollback(tx).unwrap();

        assert!(backend.borrow().is_empty());
    }

    #[test]
    fn rows_travel_by_primary_key() {
        let (mut store, backend) = music_store_with_backend();
        let handle = store.insert(album("a", &["t"])).unwrap();

        let track_pk = {
            let album = store.get(handle).unwrap();
            let track_key = album.tracks.iter_keys().next().unwrap();
            let track: Handle<Track> = Handle::new(track_key);
            store.get(track).unwrap().id.clone()
        };

        let row = backend.borrow().row("track", &track_pk).cloned().unwrap();
        match row.field("album") {
            Some(FieldState::Reference(Some(entry))) => {
                assert!(entry.key.is_none());
                assert_eq!(entry.pk, store.get(handle).unwrap().id);
            }
            other => panic!("unexpected field state: {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    #[test]
    fn load_resolves_forward_references_through_ghosts() {
        // populate one store, then replay its backend into a fresh one
        let backend = Rc::new(RefCell::new(InMemoryBackend::new()));
        {
            let mut store = Store::with_backend(Box::new(Rc::clone(&backend)));
            store.attach::<Album>("album").unwrap();
            store.attach::<Track>("track").unwrap();
            store.insert(album("m", &["t1", "t2"])).unwrap();
        }

        let mut fresh = Store::with_backend(Box::new(Rc::clone(&backend)));
        fresh.attach::<Album>("album").unwrap();
        fresh.attach::<Track>("track").unwrap();

        // tracks first: their album references materialize as a ghost
        assert_eq!(fresh.load::<Track>().unwrap(), 2);
        assert_eq!(fresh.len(), 3);

        // the album row fills the ghost in place
        assert_eq!(fresh.load::<Album>().unwrap(), 1);
        assert_eq!(fresh.len(), 3);

        let mut albums = Vec::new();
        fresh
            .for_each::<Album>(|handle, value| albums.push((handle, value.name.clone())))
            .unwrap();
        assert_eq!(albums.len(), 1);
        let (album_handle, name) = albums.remove(0);
        assert_eq!(name, "m");

        let album_ref = fresh.get(album_handle).unwrap();
        assert_eq!(album_ref.tracks.len(), 2);
        for track_key in album_ref.tracks.iter_keys().collect::<Vec<_>>() {
            let track: Handle<Track> = Handle::new(track_key);
            assert_eq!(
                fresh.get(track).unwrap().album.key(),
                Some(album_handle.key())
            );
        }
        assert_eq!(fresh.holder_count(album_handle.key()), Some(2));
    }

    #[test]
    fn load_is_idempotent_for_materialized_rows() {
        let (mut store, _backend) = music_store_with_backend();
        store.insert(album("a", &[])).unwrap();

        assert_eq!(store.load::<Album>().unwrap(), 0);
        assert_eq!(store.len(), 1);
    }
}
