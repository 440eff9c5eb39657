//! The document loop.
//!
//! A [`Document`] owns the authoritative CRDT root plus everything needed to
//! stay convergent with a server: the clock state, the not-yet-acknowledged
//! local changes, presence tables, undo history, and a lazily created
//! speculative clone that local mutators run against. Anything that goes
//! wrong during an update discards the clone and leaves the authoritative
//! root untouched.
//!
//! All of this is single-threaded and synchronous; the transport re-enters
//! through [`Document::apply_change_pack`] / [`Document::apply_watch_stream`]
//! between updates, never during one.

pub mod event;
pub mod history;
pub mod txn;

use std::collections::{HashMap, HashSet};

use log::{trace, warn};
use serde_json::Value as Json;

use crate::change::{Change, ChangeContext, ChangeId, ChangeSource, Checkpoint};
use crate::crdt::root::{CrdtRoot, DocSize};
use crate::crdt::Content;
use crate::error::DocError;
use crate::operation::{Operation, ReverseOp};
use crate::pack::{ChangePack, DocKey, DocSnapshot, WatchDocEventType, WatchDocumentResponse};
use crate::presence::{PresenceChange, PresenceData};
use crate::schema::Rule;
use crate::time::{ActorId, VersionVector};

pub use event::{DocEvent, EventFilter, Subscription};
pub use history::{HistoryEntry, UndoRedoHistory};
pub use txn::Transaction;

use event::EventHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    Detached,
    Attached,
    Removed,
}

/// Knobs the client passes at construction. All default off.
#[derive(Debug, Clone, Default)]
pub struct DocumentOptions {
    /// Skip the GC phase of `apply_change_pack`.
    pub disable_gc: bool,
    /// Keep a replay log of applied changes for devtools.
    pub enable_devtools: bool,
    /// Reject updates that would push live+gc bytes past this. 0 = no limit.
    pub max_size_limit: i64,
    /// Structural rules re-checked against every local update.
    pub schema_rules: Vec<Rule>,
}

/// The speculative mirror local mutators write through.
#[derive(Debug, Clone)]
struct DocClone {
    root: CrdtRoot,
    presences: HashMap<ActorId, PresenceData>,
}

#[derive(Debug)]
pub struct Document {
    key: DocKey,
    status: DocStatus,
    options: DocumentOptions,

    root: CrdtRoot,
    clone_state: Option<DocClone>,

    change_id: ChangeId,
    checkpoint: Checkpoint,
    local_changes: Vec<Change>,

    presences: HashMap<ActorId, PresenceData>,
    online_clients: HashSet<ActorId>,

    history: UndoRedoHistory,
    is_updating: bool,

    events: EventHub,
    devtools_log: Vec<Change>,
}

impl Document {
    pub fn new(key: DocKey) -> Self {
        Self::with_options(key, DocumentOptions::default())
    }

    pub fn with_options(key: DocKey, options: DocumentOptions) -> Self {
        Document {
            key,
            status: DocStatus::Detached,
            options,
            root: CrdtRoot::new(),
            clone_state: None,
            change_id: ChangeId::initial(),
            checkpoint: Checkpoint::INITIAL,
            local_changes: Vec::new(),
            presences: HashMap::new(),
            online_clients: HashSet::new(),
            history: UndoRedoHistory::new(),
            is_updating: false,
            events: EventHub::default(),
            devtools_log: Vec::new(),
        }
    }

    // ---- local change pipeline ------------------------------------------

    /// Run a mutator against the speculative clone and, if it succeeds and
    /// validates, commit the resulting change to the authoritative root.
    pub fn update<F>(&mut self, f: F) -> Result<(), DocError>
    where
        F: FnOnce(&mut Transaction) -> Result<(), DocError>,
    {
        self.update_with_message(None, f)
    }

    pub fn update_with_message<F>(&mut self, message: Option<&str>, f: F) -> Result<(), DocError>
    where
        F: FnOnce(&mut Transaction) -> Result<(), DocError>,
    {
        if self.status == DocStatus::Removed {
            return Err(DocError::DocumentRemoved);
        }
        if self.is_updating {
            return Err(DocError::Refused("update is not re-entrant".into()));
        }

        self.ensure_clone();
        let actor = self.change_id.actor;
        let prior_presence = self
            .clone_state
            .as_ref()
            .expect("just ensured")
            .presences
            .get(&actor)
            .cloned()
            .unwrap_or_default();
        let mut ctx = ChangeContext::new(&self.change_id, prior_presence, message.map(Into::into));

        self.is_updating = true;
        let result = {
            let clone = self.clone_state.as_mut().expect("just ensured");
            let mut tx = Transaction::new(&mut ctx, &mut clone.root);
            f(&mut tx)
        };
        self.is_updating = false;

        // Fail-fast rollback: a failed mutator contaminates the clone.
        if let Err(err) = result {
            self.clone_state = None;
            return Err(err);
        }
        if !ctx.has_change() {
            return Ok(());
        }

        if !ctx.is_presence_only() && !self.options.schema_rules.is_empty() {
            let clone = self.clone_state.as_ref().expect("just ensured");
            if let Err(messages) = crate::schema::validate(&clone.root, &self.options.schema_rules)
            {
                self.clone_state = None;
                return Err(DocError::SchemaValidationFailed(messages));
            }
        }

        if self.options.max_size_limit > 0 {
            let size = self.clone_state.as_ref().expect("just ensured").root.doc_size().total();
            if size > self.options.max_size_limit {
                self.clone_state = None;
                return Err(DocError::SizeExceedsLimit {
                    limit: self.options.max_size_limit,
                    size,
                });
            }
        }

        let reverse_presence = ctx.reverse_presence();
        let change = ctx.to_change();
        self.sync_clone_presence(&change);

        let executed = change.execute(&mut self.root, &mut self.presences, ChangeSource::Local);
        let (op_infos, mut reverse_ops) = match executed {
            Ok(v) => v,
            Err(err) => {
                self.clone_state = None;
                return Err(err);
            }
        };
        if let Some(entries) = reverse_presence {
            reverse_ops.push(ReverseOp::Presence { entries });
        }

        self.local_changes.push(change.clone());
        if self.options.enable_devtools {
            self.devtools_log.push(change.clone());
        }
        if !reverse_ops.is_empty() {
            self.history.push_undo(HistoryEntry { ops: reverse_ops });
        }
        if !op_infos.is_empty() {
            self.history.clear_redo();
        }
        self.change_id = change.id.clone();

        let mut batch = Vec::new();
        if !op_infos.is_empty() {
            batch.push(DocEvent::LocalChange {
                actor,
                client_seq: change.id.client_seq,
                message: change.message.clone(),
                operations: op_infos,
            });
        }
        if change.presence_change.is_some() {
            let presence = self.presences.get(&actor).cloned().unwrap_or_default();
            batch.push(DocEvent::PresenceChanged { actor, presence });
        }
        self.publish(batch);
        Ok(())
    }

    // ---- remote application ---------------------------------------------

    /// Apply one round of sync from the server.
    pub fn apply_change_pack(&mut self, pack: &ChangePack) -> Result<(), DocError> {
        if let Some(snapshot) = &pack.snapshot {
            self.apply_snapshot(
                pack.checkpoint.server_seq,
                pack.snapshot_version_vector.as_ref().unwrap_or(&pack.version_vector),
                snapshot,
                pack.checkpoint.client_seq,
            )?;
        } else {
            for change in &pack.changes {
                self.apply_change(change, ChangeSource::Remote)?;
            }
            let before = self.local_changes.len();
            self.local_changes.retain(|c| c.id.client_seq > pack.checkpoint.client_seq);
            let acked = before - self.local_changes.len();
            if acked > 0 {
                trace!("{acked} local changes acknowledged up to {:?}", pack.checkpoint);
            }
        }

        self.checkpoint = self.checkpoint.forward(&pack.checkpoint);

        if pack.snapshot.is_none() {
            self.garbage_collect(&pack.version_vector);
        }
        if pack.is_removed {
            self.apply_status(DocStatus::Removed);
        }
        Ok(())
    }

    /// Apply a single change to both the clone and the authoritative root,
    /// advancing clocks and publishing the event batch.
    pub fn apply_change(&mut self, change: &Change, source: ChangeSource) -> Result<(), DocError> {
        self.ensure_clone();
        {
            let clone = self.clone_state.as_mut().expect("just ensured");
            change.execute(&mut clone.root, &mut clone.presences, source)?;
        }

        let actor = change.id.actor;
        let presence_event = match &change.presence_change {
            Some(PresenceChange::Put { presence }) => {
                if self.online_clients.contains(&actor) && !self.presences.contains_key(&actor) {
                    Some(DocEvent::Watched { actor, presence: presence.clone() })
                } else {
                    Some(DocEvent::PresenceChanged { actor, presence: presence.clone() })
                }
            }
            Some(PresenceChange::Clear) => {
                self.online_clients.remove(&actor);
                Some(DocEvent::Unwatched { actor })
            }
            None => None,
        };

        self.change_id = self.change_id.sync_clocks(&change.id);
        let (op_infos, _) = change.execute(&mut self.root, &mut self.presences, source)?;
        if self.options.enable_devtools {
            self.devtools_log.push(change.clone());
        }
        trace!(
            "applied {:?} change from {:?} ({} ops)",
            source,
            actor,
            change.operations.len()
        );

        let mut batch = Vec::new();
        if !op_infos.is_empty() {
            batch.push(match source {
                ChangeSource::Remote => DocEvent::RemoteChange {
                    actor,
                    client_seq: change.id.client_seq,
                    message: change.message.clone(),
                    operations: op_infos,
                },
                _ => DocEvent::LocalChange {
                    actor,
                    client_seq: change.id.client_seq,
                    message: change.message.clone(),
                    operations: op_infos,
                },
            });
        }
        if let Some(ev) = presence_event {
            batch.push(ev);
        }
        self.publish(batch);
        Ok(())
    }

    /// Replace local state with a server snapshot, then re-apply whatever
    /// local changes the snapshot hadn't seen.
    pub fn apply_snapshot(
        &mut self,
        server_seq: u64,
        snapshot_vector: &VersionVector,
        snapshot: &DocSnapshot,
        client_seq: u32,
    ) -> Result<(), DocError> {
        self.root = snapshot.root.clone();
        self.presences = snapshot.presences.clone();
        self.change_id.lamport = self.change_id.lamport.max(snapshot_vector.max_lamport());
        self.change_id.version_vector = self.change_id.version_vector.max(snapshot_vector);

        // The clone predates the snapshot; it is contaminated.
        self.clone_state = None;

        self.local_changes.retain(|c| c.id.client_seq > client_seq);
        let surviving = self.local_changes.clone();
        for change in &surviving {
            change.execute(&mut self.root, &mut self.presences, ChangeSource::Local)?;
        }
        if !surviving.is_empty() {
            trace!("re-applied {} local changes on top of snapshot", surviving.len());
        }

        self.publish(vec![DocEvent::Snapshot { server_seq }]);
        Ok(())
    }

    /// Consume one message from the server's watch stream.
    pub fn apply_watch_stream(&mut self, response: &WatchDocumentResponse) {
        match response {
            WatchDocumentResponse::Initialization { client_ids } => {
                self.online_clients = client_ids.iter().copied().collect();
                let mut batch = Vec::new();
                for actor in client_ids {
                    if let Some(presence) = self.presences.get(actor) {
                        batch.push(DocEvent::Watched { actor: *actor, presence: presence.clone() });
                    }
                }
                self.publish(batch);
            }
            WatchDocumentResponse::Event { event_type, publisher, body } => match event_type {
                WatchDocEventType::DocumentWatched => {
                    self.online_clients.insert(*publisher);
                    if let Some(presence) = self.presences.get(publisher).cloned() {
                        self.publish(vec![DocEvent::Watched { actor: *publisher, presence }]);
                    }
                }
                WatchDocEventType::DocumentUnwatched => {
                    self.online_clients.remove(publisher);
                    let had_presence = self.presences.remove(publisher).is_some();
                    if had_presence {
                        self.publish(vec![DocEvent::Unwatched { actor: *publisher }]);
                    }
                }
                WatchDocEventType::DocumentBroadcast => {
                    if let Some(body) = body {
                        self.publish(vec![DocEvent::Broadcast {
                            actor: *publisher,
                            topic: body.topic.clone(),
                            payload: body.payload.clone(),
                        }]);
                    }
                }
            },
        }
    }

    // ---- undo / redo ----------------------------------------------------

    pub fn undo(&mut self) -> Result<(), DocError> {
        if self.is_updating {
            return Err(DocError::Refused("undo inside an update".into()));
        }
        let entry = self
            .history
            .pop_undo()
            .ok_or_else(|| DocError::Refused("nothing to undo".into()))?;
        self.replay_history(entry, true)
    }

    pub fn redo(&mut self) -> Result<(), DocError> {
        if self.is_updating {
            return Err(DocError::Refused("redo inside an update".into()));
        }
        let entry = self
            .history
            .pop_redo()
            .ok_or_else(|| DocError::Refused("nothing to redo".into()))?;
        self.replay_history(entry, false)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo() && !self.is_updating
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo() && !self.is_updating
    }

    /// Replay a history entry through a fresh context: fresh tickets, normal
    /// execution, inverses pushed onto the opposite stack.
    fn replay_history(&mut self, entry: HistoryEntry, is_undo: bool) -> Result<(), DocError> {
        self.ensure_clone();
        let actor = self.change_id.actor;
        let prior_presence = self
            .clone_state
            .as_ref()
            .expect("just ensured")
            .presences
            .get(&actor)
            .cloned()
            .unwrap_or_default();
        let mut ctx = ChangeContext::new(&self.change_id, prior_presence, None);

        {
            let clone = self.clone_state.as_mut().expect("just ensured");
            for rop in entry.ops {
                match reverse_to_operation(&mut ctx, &clone.root, rop) {
                    Ok(Some(op)) => match op.execute(&mut clone.root, None) {
                        Ok(_) => ctx.push(op),
                        Err(err) => warn!("skipping history op that no longer applies: {err}"),
                    },
                    Ok(None) => {} // presence delta, already folded into ctx
                    Err(err) => warn!("skipping unreplayable history op: {err}"),
                }
            }
        }

        // Everything the entry described may have been overwritten or
        // collected since; nothing visible to do means nothing to propagate.
        if !ctx.has_change() {
            return Ok(());
        }

        let reverse_presence = ctx.reverse_presence();
        let change = ctx.to_change();
        self.sync_clone_presence(&change);

        let (op_infos, mut new_reverse) =
            change.execute(&mut self.root, &mut self.presences, ChangeSource::UndoRedo)?;
        if let Some(entries) = reverse_presence {
            new_reverse.push(ReverseOp::Presence { entries });
        }
        if !new_reverse.is_empty() {
            let new_entry = HistoryEntry { ops: new_reverse };
            if is_undo {
                self.history.push_redo(new_entry);
            } else {
                self.history.push_undo(new_entry);
            }
        }

        self.local_changes.push(change.clone());
        if self.options.enable_devtools {
            self.devtools_log.push(change.clone());
        }
        self.change_id = change.id.clone();

        let mut batch = Vec::new();
        if !op_infos.is_empty() {
            batch.push(DocEvent::LocalChange {
                actor,
                client_seq: change.id.client_seq,
                message: None,
                operations: op_infos,
            });
        }
        if change.presence_change.is_some() {
            let presence = self.presences.get(&actor).cloned().unwrap_or_default();
            batch.push(DocEvent::PresenceChanged { actor, presence });
        }
        self.publish(batch);
        Ok(())
    }

    // ---- lifecycle, transport hooks -------------------------------------

    /// Adopt the server-assigned actor at attach time.
    pub fn set_actor(&mut self, actor: ActorId) {
        self.change_id.set_actor(actor);
        // Tickets already issued against the placeholder actor live in the
        // clone; drop it rather than reconcile.
        self.clone_state = None;
    }

    pub fn apply_status(&mut self, status: DocStatus) {
        self.status = status;
        if status == DocStatus::Detached {
            self.clone_state = None;
        }
        self.publish(vec![DocEvent::StatusChanged { status }]);
    }

    /// Everything the transport needs to push for this document.
    pub fn create_change_pack(&self) -> ChangePack {
        ChangePack {
            doc_key: self.key.clone(),
            checkpoint: self.checkpoint,
            is_removed: self.status == DocStatus::Removed,
            changes: self.local_changes.clone(),
            snapshot: None,
            snapshot_version_vector: None,
            version_vector: self.change_id.version_vector.clone(),
        }
    }

    /// Run the collector with a minimum-synced vector (usually the one the
    /// server sent with a pack). The clone is collected too, so both mirrors
    /// stay structurally identical.
    pub fn garbage_collect(&mut self, min_synced: &VersionVector) -> usize {
        if self.options.disable_gc {
            return 0;
        }
        if let Some(clone) = self.clone_state.as_mut() {
            clone.root.garbage_collect(min_synced);
        }
        self.root.garbage_collect(min_synced)
    }

    /// Ask the transport to broadcast `payload` on `topic`. The transport
    /// subscribes to `local-broadcast` and relays.
    pub fn broadcast(&mut self, topic: &str, payload: Vec<u8>) {
        self.publish(vec![DocEvent::LocalBroadcast { topic: topic.into(), payload }]);
    }

    /// Surface an auth failure from the transport as an event.
    pub fn notify_auth_error(&mut self, reason: &str) {
        self.publish(vec![DocEvent::AuthError { reason: reason.into() }]);
    }

    /// Subscribe with a topic selector (`default`, `presence`,
    /// `my-presence`, `others`, `connection`, `status`, `sync`,
    /// `broadcast`, `local-broadcast`, `auth-error`, `all`) or a `$.a.b`
    /// path prefix.
    pub fn subscribe(&mut self, selector: &str) -> Result<Subscription, DocError> {
        let filter = EventFilter::parse(selector)?;
        Ok(self.events.subscribe(filter))
    }

    // ---- accessors ------------------------------------------------------

    pub fn key(&self) -> &DocKey {
        &self.key
    }

    pub fn status(&self) -> DocStatus {
        self.status
    }

    pub fn actor(&self) -> ActorId {
        self.change_id.actor
    }

    pub fn change_id(&self) -> &ChangeId {
        &self.change_id
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn root(&self) -> &CrdtRoot {
        &self.root
    }

    pub fn to_json(&self) -> Json {
        self.root.to_json()
    }

    pub fn to_sorted_json(&self) -> String {
        self.root.to_sorted_json()
    }

    pub fn doc_size(&self) -> &DocSize {
        self.root.doc_size()
    }

    pub fn garbage_len(&self) -> usize {
        self.root.garbage_len()
    }

    pub fn pending_changes(&self) -> &[Change] {
        &self.local_changes
    }

    pub fn my_presence(&self) -> Option<&PresenceData> {
        self.presences.get(&self.change_id.actor)
    }

    pub fn presence(&self, actor: &ActorId) -> Option<&PresenceData> {
        self.presences.get(actor)
    }

    pub fn online_clients(&self) -> &HashSet<ActorId> {
        &self.online_clients
    }

    /// The raw replay log, when devtools are enabled.
    pub fn devtools_changes(&self) -> &[Change] {
        &self.devtools_log
    }

    /// Plain-string view of the text at `path`, a convenience for tests and
    /// editors.
    pub fn text_string(&self, path: &str) -> Result<String, DocError> {
        let id = self.root.resolve_path(path)?;
        match &self.root.elem(id).content {
            Content::Text(t) => Ok(t.to_string()),
            _ => Err(DocError::InvalidArgument(format!("{path} is not a text"))),
        }
    }

    /// Check the internal state of the document. This is only exported for
    /// integration testing; do not depend on it as part of the API.
    #[doc(hidden)]
    pub fn dbg_check(&self) {
        self.root.dbg_check();
        if let Some(clone) = &self.clone_state {
            clone.root.dbg_check();
        }
    }

    // ---- internals ------------------------------------------------------

    /// The clone is created lazily and reused until something invalidates
    /// it. Idempotent.
    fn ensure_clone(&mut self) {
        if self.clone_state.is_none() {
            self.clone_state = Some(DocClone {
                root: self.root.clone(),
                presences: self.presences.clone(),
            });
        }
    }

    /// Keep the clone's presence table in step with a change we just built
    /// (its root already saw the ops via the transaction).
    fn sync_clone_presence(&mut self, change: &Change) {
        let Some(clone) = self.clone_state.as_mut() else { return };
        match &change.presence_change {
            Some(PresenceChange::Put { presence }) => {
                clone.presences.insert(change.id.actor, presence.clone());
            }
            Some(PresenceChange::Clear) => {
                clone.presences.remove(&change.id.actor);
            }
            None => {}
        }
    }

    fn publish(&mut self, batch: Vec<DocEvent>) {
        let me = self.change_id.actor;
        self.events.publish(&batch, &me);
    }
}

/// Rebuild a reverse entry as a forward operation against the current
/// state, with fresh tickets from `ctx`. Presence reversals fold straight
/// into the context and return `None`.
fn reverse_to_operation(
    ctx: &mut ChangeContext,
    root: &CrdtRoot,
    rop: ReverseOp,
) -> Result<Option<Operation>, DocError> {
    Ok(Some(match rop {
        ReverseOp::Set { parent, key, value } => {
            let (created_at, payload) = txn::build_payload(ctx, &value)?;
            Operation::Set {
                parent,
                key,
                created_at,
                value: payload,
                executed_at: ctx.issue_time_ticket(),
            }
        }
        ReverseOp::Remove { parent, created_at } => Operation::Remove {
            parent,
            created_at,
            executed_at: ctx.issue_time_ticket(),
        },
        ReverseOp::Increase { parent, value } => Operation::Increase {
            parent,
            value,
            executed_at: ctx.issue_time_ticket(),
        },
        ReverseOp::Edit { parent, from, to, content } => {
            let id = root
                .find_by_created_at(&parent)
                .ok_or_else(|| DocError::unknown_element(&format!("{parent:?}")))?;
            let Content::Text(text) = &root.elem(id).content else {
                return Err(DocError::InvalidArgument("history target is not a text".into()));
            };
            // Remote edits may have shrunk the text since; clamp.
            let len = text.len();
            let (from_pos, to_pos) = text.pos_range(from.min(len), to.min(len))?;
            Operation::Edit {
                parent,
                from: from_pos,
                to: to_pos,
                content,
                attributes: Vec::new(),
                executed_at: ctx.issue_time_ticket(),
            }
        }
        ReverseOp::Style { parent, from, to, attrs } => Operation::Style {
            parent,
            from,
            to,
            attributes: attrs,
            executed_at: ctx.issue_time_ticket(),
        },
        ReverseOp::Presence { entries } => {
            ctx.set_presence(entries, true);
            return Ok(None);
        }
    }))
}
