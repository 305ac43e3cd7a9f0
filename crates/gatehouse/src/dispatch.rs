//! The dispatch loop and the `Gatehouse` handle.
//!
//! All traffic enters as [`Envelope`]s on one mpsc queue. The loop consults
//! the routing table: inline requests execute on the loop's own stack, which
//! totally orders every mutation of the permission graph; concurrent
//! requests are spawned with cloned handles. A watch channel signals
//! shutdown, after which the loop stops accepting input and drains its
//! in-flight tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use gatehouse_core::{
    InstanceMode, NameDirectory, TeamId, TeamRecord, TokenSecret, UserId, UserRecord, Verdict,
    ROOT_USER,
};
use gatehouse_perms::PermissionEngine;
use gatehouse_session::{Authenticator, KexManager, SessionError};
use gatehouse_store::{AuthStore, SqliteStore};

use crate::config::Config;
use crate::error::{GatehouseError, Result};
use crate::request::{
    routing, Envelope, MapKind, MapOp, MapUpdate, Reply, ReplyBody, Request, Routing,
};

/// The id the root account is seeded with when no identity subsystem has
/// pushed one.
const ROOT_SEED_ID: UserId = UserId(0);

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}

/// Bootstrap endpoints mask their failures: a caller probing activation or
/// token issuance learns only "unauthorized", not which step failed.
fn masked(err: SessionError) -> Verdict {
    match err {
        SessionError::ReadOnly => Verdict::Conflict,
        SessionError::Store(e) => {
            tracing::error!(error = %e, "storage failure on bootstrap endpoint");
            Verdict::ServerError
        }
        _ => Verdict::Unauthorized,
    }
}

/// The request executor behind the dispatch loop.
///
/// Cheap to clone; clones share every cache and the store.
#[derive(Clone)]
struct Dispatcher {
    store: Arc<dyn AuthStore>,
    auth: Authenticator,
    engine: PermissionEngine,
    users: NameDirectory<UserId>,
    teams: NameDirectory<TeamId>,
    mode: InstanceMode,
    prune_interval: Duration,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::Receiver<Envelope>, mut shutdown: watch::Receiver<bool>) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut prune = tokio::time::interval(self.prune_interval);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(envelope) => self.handle(envelope, &mut tasks).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = prune.tick() => {
                    self.auth.kex().prune(now_millis());
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // No new input; finish what was already spawned, then exit.
        rx.close();
        while tasks.join_next().await.is_some() {}
        tracing::info!("dispatcher stopped");
    }

    async fn handle(&self, envelope: Envelope, tasks: &mut JoinSet<()>) {
        let Envelope {
            actor,
            remote_addr,
            request,
            reply,
        } = envelope;

        match routing(&request) {
            Routing::Inline => {
                // Runs to completion before the next envelope is taken;
                // this is what totally orders graph mutations.
                let out = self.execute(actor, &remote_addr, request).await;
                let _ = reply.send(out);
            }
            Routing::Concurrent => {
                let this = self.clone();
                tasks.spawn(async move {
                    let out = this.execute(actor, &remote_addr, request).await;
                    // A dropped receiver means the caller went away.
                    let _ = reply.send(out);
                });
            }
        }
    }

    async fn execute(&self, actor: Option<UserId>, remote_addr: &str, request: Request) -> Reply {
        let now = now_millis();

        match request {
            // ── Bootstrap channel ────────────────────────────────────────
            Request::KexInit {
                client_public,
                client_iv,
            } => match self
                .auth
                .kex()
                .initiate(&client_public, &client_iv, remote_addr, now)
            {
                Ok(offer) => Reply::ok(ReplyBody::KexOffer(offer)),
                Err(SessionError::ReadOnly) => Reply::verdict(Verdict::Conflict),
                Err(e) => {
                    tracing::error!(error = %e, "kex init failed");
                    Reply::verdict(Verdict::ServerError)
                }
            },

            Request::RequestToken {
                request_id,
                ciphertext,
            } => match self.auth.issue_token(request_id, &ciphertext, now).await {
                Ok(token) => Reply::ok(ReplyBody::Token(token)),
                Err(e) => Reply::verdict(masked(e)),
            },

            Request::ActivateUser {
                request_id,
                ciphertext,
            } => match self.auth.activate_user(request_id, &ciphertext, now).await {
                Ok(user) => Reply::ok(ReplyBody::User(user)),
                Err(e) => Reply::verdict(masked(e)),
            },

            Request::ChangePassword {
                request_id,
                ciphertext,
            } => match self.auth.change_password(request_id, &ciphertext, now).await {
                Ok(user) => Reply::ok(ReplyBody::User(user)),
                Err(e) => Reply::verdict(masked(e)),
            },

            Request::ResetPassword {
                request_id,
                ciphertext,
            } => match self.auth.reset_password(request_id, &ciphertext, now).await {
                Ok(user) => Reply::ok(ReplyBody::User(user)),
                Err(e) => Reply::verdict(masked(e)),
            },

            // ── Authentication / authorization ───────────────────────────
            Request::BasicAuth {
                username,
                token,
                restricted_channel,
            } => {
                let verdict = self
                    .auth
                    .validate_basic_auth(&username, &token, restricted_channel, remote_addr, now)
                    .await;
                Reply::verdict(verdict)
            }

            Request::Authorize {
                user,
                category,
                permission,
                object,
            } => {
                let verdict = self.engine.authorize(user, &category, &permission, object).await;
                Reply::verdict(verdict)
            }

            // ── Identity deltas ──────────────────────────────────────────
            Request::UpdateMap(update) => self.apply_map_update(update).await,

            // ── Categories ───────────────────────────────────────────────
            Request::CategoryAdd { name } => {
                let Some(actor) = actor else {
                    return Reply::verdict(Verdict::Unauthorized);
                };
                match self.engine.category_add(&name, actor, now).await {
                    Ok(()) => Reply::ok(ReplyBody::Empty),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::CategoryRemove { name } => match self.engine.category_remove(&name).await {
                Ok(()) => Reply::ok(ReplyBody::Empty),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },
            Request::CategoryList => match self.engine.categories().await {
                Ok(categories) => Reply::ok(ReplyBody::Categories(categories)),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },
            Request::CategoryShow { name } => match self.engine.category(&name).await {
                Ok(Some(category)) => Reply::ok(ReplyBody::Category(category)),
                Ok(None) => Reply::verdict(Verdict::NotFound),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },

            // ── Permissions ──────────────────────────────────────────────
            Request::PermissionAdd { category, name } => {
                let Some(actor) = actor else {
                    return Reply::verdict(Verdict::Unauthorized);
                };
                match self.engine.permission_add(&category, &name, actor, now).await {
                    Ok((primary, meta)) => Reply::ok(ReplyBody::PermissionPair { primary, meta }),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::PermissionRemove { category, name } => {
                match self.engine.permission_remove(&category, &name).await {
                    Ok(()) => Reply::ok(ReplyBody::Empty),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::PermissionList { category } => match self.engine.permissions(&category).await {
                Ok(permissions) => Reply::ok(ReplyBody::Permissions(permissions)),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },
            Request::PermissionShow { category, name } => {
                match self.engine.permission(&category, &name).await {
                    Ok(Some(permission)) => Reply::ok(ReplyBody::Permission(permission)),
                    Ok(None) => Reply::verdict(Verdict::NotFound),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::PermissionSearch { needle } => match self.engine.search(&needle).await {
                Ok(permissions) => Reply::ok(ReplyBody::Permissions(permissions)),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },

            // ── Sections and actions ─────────────────────────────────────
            Request::SectionAdd { category, name } => {
                match self.engine.section_add(&category, &name).await {
                    Ok(section) => Reply::ok(ReplyBody::Section(section)),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::SectionRemove { section } => match self.engine.section_remove(section).await {
                Ok(()) => Reply::ok(ReplyBody::Empty),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },
            Request::SectionList { category } => match self.engine.sections(&category).await {
                Ok(sections) => Reply::ok(ReplyBody::Sections(sections)),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },
            Request::ActionAdd { section, name } => {
                match self.engine.action_add(section, &name).await {
                    Ok(action) => Reply::ok(ReplyBody::Action(action)),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::ActionRemove { action } => match self.engine.action_remove(action).await {
                Ok(()) => Reply::ok(ReplyBody::Empty),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },
            Request::ActionList { section } => match self.engine.actions(section).await {
                Ok(actions) => Reply::ok(ReplyBody::Actions(actions)),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },

            // ── Grants ───────────────────────────────────────────────────
            Request::RightGrant {
                recipient,
                category,
                permission,
                object,
            } => {
                match self
                    .engine
                    .right_grant(recipient, &category, &permission, object)
                    .await
                {
                    Ok(grant) => Reply::ok(ReplyBody::Grant(grant)),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::RightRevoke {
                recipient,
                grant,
                category,
                permission,
            } => {
                match self
                    .engine
                    .right_revoke(recipient, grant, &category, &permission)
                    .await
                {
                    Ok(()) => Reply::ok(ReplyBody::Empty),
                    Err(e) => Reply::error(e.verdict(), e.to_string()),
                }
            }
            Request::RightList { recipient } => match self.engine.grants_for(recipient).await {
                Ok(grants) => Reply::ok(ReplyBody::Grants(grants)),
                Err(e) => Reply::error(e.verdict(), e.to_string()),
            },
        }
    }

    /// Apply an identity delta from the user/team subsystems.
    ///
    /// Directories update on every instance; the backing rows persist only
    /// on writable ones. A rename drops the old reverse entry before the
    /// new name resolves.
    async fn apply_map_update(&self, update: MapUpdate) -> Reply {
        match (update.kind, update.op) {
            (MapKind::User, MapOp::Add) | (MapKind::User, MapOp::Update) => {
                let Some(name) = update.name else {
                    return Reply::error(Verdict::BadRequest, "name required");
                };
                let id = UserId(update.id);
                if self.mode.is_writable() {
                    // Adds arrive inactive; activation flips the flag later.
                    // Updates keep whatever the row already says.
                    let active = match self.store.user_by_id(id).await {
                        Ok(Some(existing)) => existing.active,
                        Ok(None) => false,
                        Err(e) => {
                            tracing::error!(error = %e, "user lookup failed applying map update");
                            return Reply::verdict(Verdict::ServerError);
                        }
                    };
                    let record = UserRecord {
                        id,
                        name: name.clone(),
                        active,
                    };
                    if let Err(e) = self.store.upsert_user(&record).await {
                        tracing::error!(error = %e, "user upsert failed applying map update");
                        return Reply::verdict(Verdict::ServerError);
                    }
                }
                self.users.upsert(id, &name);
                Reply::ok(ReplyBody::Empty)
            }
            (MapKind::User, MapOp::Delete) => {
                let id = UserId(update.id);
                if self.mode.is_writable() {
                    if let Err(e) = self.store.delete_user(id).await {
                        tracing::error!(error = %e, "user delete failed applying map update");
                        return Reply::verdict(Verdict::ServerError);
                    }
                }
                self.users.remove(id);
                Reply::ok(ReplyBody::Empty)
            }
            (MapKind::Team, MapOp::Add) | (MapKind::Team, MapOp::Update) => {
                let Some(name) = update.name else {
                    return Reply::error(Verdict::BadRequest, "name required");
                };
                let id = TeamId(update.id);
                if self.mode.is_writable() {
                    let record = TeamRecord {
                        id,
                        name: name.clone(),
                    };
                    if let Err(e) = self.store.upsert_team(&record).await {
                        tracing::error!(error = %e, "team upsert failed applying map update");
                        return Reply::verdict(Verdict::ServerError);
                    }
                }
                self.teams.upsert(id, &name);
                Reply::ok(ReplyBody::Empty)
            }
            (MapKind::Team, MapOp::Delete) => {
                let id = TeamId(update.id);
                if self.mode.is_writable() {
                    if let Err(e) = self.store.delete_team(id).await {
                        tracing::error!(error = %e, "team delete failed applying map update");
                        return Reply::verdict(Verdict::ServerError);
                    }
                }
                self.teams.remove(id);
                Reply::ok(ReplyBody::Empty)
            }
        }
    }
}

/// A running Gatehouse instance.
///
/// Owns the request queue and the dispatch task; dropping it without
/// calling [`Gatehouse::stop`] aborts in-flight work when the runtime goes
/// down.
pub struct Gatehouse {
    tx: mpsc::Sender<Envelope>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
    root: UserId,
}

impl Gatehouse {
    /// Open the store, bootstrap and warm a writable instance, and spawn
    /// the dispatch loop.
    pub async fn start(config: Config) -> Result<Self> {
        let store = match &config.db_path {
            Some(path) => SqliteStore::open(path, config.mode)?,
            None => SqliteStore::open_memory(config.mode)?,
        };
        let store: Arc<SqliteStore> = Arc::new(store);

        let secret = match &config.token_secret {
            Some(hex) => TokenSecret::from_hex(hex)
                .map_err(|e| GatehouseError::Config(format!("token_secret: {e}")))?,
            None => TokenSecret::generate(),
        };

        let kex = KexManager::with_ttl(config.mode, config.kex_session_ttl_ms);
        let auth = Authenticator::new(store.clone(), kex, secret, config.root_policy)
            .with_token_ttl(config.token_ttl_ms);
        let engine = PermissionEngine::new(store.clone());
        let users: NameDirectory<UserId> = NameDirectory::new();
        let teams: NameDirectory<TeamId> = NameDirectory::new();

        let root = if config.mode.is_writable() {
            let now = now_millis();
            let root = Self::ensure_root(store.as_ref()).await?;
            engine.bootstrap(root, now).await?;
            auth.warm_caches().await?;
            engine.warm().await?;
            root
        } else {
            // Read-only instances backfill lazily; the root row, if any,
            // came from the writer.
            match store.user_by_name(ROOT_USER).await? {
                Some(user) => user.id,
                None => ROOT_SEED_ID,
            }
        };

        for user in store.users().await? {
            users.upsert(user.id, &user.name);
        }
        for team in store.teams().await? {
            teams.upsert(team.id, &team.name);
        }

        let dispatcher = Dispatcher {
            store,
            auth,
            engine,
            users,
            teams,
            mode: config.mode,
            prune_interval: Duration::from_millis(config.kex_prune_interval_ms.max(1)),
        };

        let (tx, rx) = mpsc::channel(config.queue_depth);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx, shutdown_rx));

        tracing::info!(mode = ?config.mode, "gatehouse started");
        Ok(Self {
            tx,
            shutdown,
            handle,
            root,
        })
    }

    async fn ensure_root(store: &SqliteStore) -> Result<UserId> {
        if let Some(user) = store.user_by_name(ROOT_USER).await? {
            return Ok(user.id);
        }
        let record = UserRecord {
            id: ROOT_SEED_ID,
            name: ROOT_USER.to_string(),
            active: true,
        };
        store.upsert_user(&record).await?;
        Ok(record.id)
    }

    /// The root account's user id.
    pub fn root(&self) -> UserId {
        self.root
    }

    /// Submit a request and wait for its reply.
    pub async fn send(
        &self,
        actor: Option<UserId>,
        remote_addr: &str,
        request: Request,
    ) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            actor,
            remote_addr: remote_addr.to_string(),
            request,
            reply: reply_tx,
        };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| GatehouseError::Unavailable)?;
        reply_rx.await.map_err(|_| GatehouseError::Unavailable)
    }

    /// Signal shutdown and wait for the dispatch loop to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
