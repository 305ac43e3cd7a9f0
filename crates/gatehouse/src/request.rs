//! Request and reply messages, and the routing policy table.
//!
//! Every operation the core serves is one `Request` variant; the dispatcher
//! matches them exhaustively, so adding a variant forces a handling
//! decision at compile time. The routing table in [`routing`] is the single
//! place that decides which requests the dispatch loop executes inline (and
//! thereby totally orders) and which it spawns concurrently.

use tokio::sync::oneshot;

use gatehouse_core::{
    ActionId, ActionRecord, Category, CategoryRecord, GrantId, GrantRecord, Iv, KexPublicKey,
    ObjectId, PermissionId, PermissionRecord, Recipient, RequestId, SectionId, SectionRecord,
    TokenRecord, TokenValue, UserId, Verdict,
};
use gatehouse_session::KexOffer;

/// Identity kind an [`MapUpdate`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    User,
    Team,
}

/// Operation of an [`MapUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOp {
    Add,
    Update,
    Delete,
}

/// An identity delta pushed from the platform's user/team subsystems.
#[derive(Debug, Clone)]
pub struct MapUpdate {
    pub kind: MapKind,
    pub op: MapOp,
    pub id: i64,
    /// Required for add and update; ignored for delete.
    pub name: Option<String>,
}

/// One operation against the auth core.
#[derive(Debug, Clone)]
pub enum Request {
    // Bootstrap channel
    KexInit {
        client_public: KexPublicKey,
        client_iv: Iv,
    },
    RequestToken {
        request_id: RequestId,
        ciphertext: Vec<u8>,
    },
    ActivateUser {
        request_id: RequestId,
        ciphertext: Vec<u8>,
    },
    ChangePassword {
        request_id: RequestId,
        ciphertext: Vec<u8>,
    },
    ResetPassword {
        request_id: RequestId,
        ciphertext: Vec<u8>,
    },

    // Authentication / authorization
    BasicAuth {
        username: String,
        token: TokenValue,
        restricted_channel: bool,
    },
    Authorize {
        user: UserId,
        category: Category,
        permission: String,
        object: Option<ObjectId>,
    },

    // Identity deltas
    UpdateMap(MapUpdate),

    // Categories
    CategoryAdd { name: Category },
    CategoryRemove { name: Category },
    CategoryList,
    CategoryShow { name: Category },

    // Permissions
    PermissionAdd { category: Category, name: String },
    PermissionRemove { category: Category, name: String },
    PermissionList { category: Category },
    PermissionShow { category: Category, name: String },
    PermissionSearch { needle: String },

    // Sections and actions
    SectionAdd { category: Category, name: String },
    SectionRemove { section: SectionId },
    SectionList { category: Category },
    ActionAdd { section: SectionId, name: String },
    ActionRemove { action: ActionId },
    ActionList { section: SectionId },

    // Grants
    RightGrant {
        recipient: Recipient,
        category: Category,
        permission: String,
        object: Option<ObjectId>,
    },
    RightRevoke {
        recipient: Recipient,
        grant: GrantId,
        category: Category,
        permission: String,
    },
    RightList { recipient: Recipient },
}

/// The typed result payload of a reply.
#[derive(Debug)]
pub enum ReplyBody {
    Empty,
    KexOffer(KexOffer),
    Token(TokenRecord),
    User(UserId),
    Category(CategoryRecord),
    Categories(Vec<CategoryRecord>),
    Permission(PermissionRecord),
    Permissions(Vec<PermissionRecord>),
    PermissionPair { primary: PermissionId, meta: PermissionId },
    Section(SectionId),
    Sections(Vec<SectionRecord>),
    Action(ActionId),
    Actions(Vec<ActionRecord>),
    Grant(GrantRecord),
    Grants(Vec<GrantRecord>),
    Message(String),
}

/// A verdict plus its payload. Every envelope gets exactly one.
#[derive(Debug)]
pub struct Reply {
    pub verdict: Verdict,
    pub body: ReplyBody,
}

impl Reply {
    /// A success reply with a payload.
    pub fn ok(body: ReplyBody) -> Self {
        Self {
            verdict: Verdict::Ok,
            body,
        }
    }

    /// A bare verdict with no payload.
    pub fn verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            body: ReplyBody::Empty,
        }
    }

    /// A failure verdict carrying detail text.
    pub fn error(verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            verdict,
            body: ReplyBody::Message(detail.into()),
        }
    }
}

/// A request plus the context and reply channel it travels with.
#[derive(Debug)]
pub struct Envelope {
    /// The authenticated caller, if any. Bootstrap requests carry none.
    pub actor: Option<UserId>,
    /// Remote address, for kex sessions and audit logs.
    pub remote_addr: String,
    pub request: Request,
    pub reply: oneshot::Sender<Reply>,
}

/// How the dispatch loop executes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Executed on the loop's own stack; inline requests are totally
    /// ordered with respect to each other.
    Inline,
    /// Spawned onto the runtime; may interleave freely.
    Concurrent,
}

/// The routing policy table.
///
/// Mutations of the permission graph run inline so concurrent grant/revoke
/// for the same triple serialize. Reads, authentication, and the bootstrap
/// operations have no ordering requirement and run concurrently.
pub fn routing(request: &Request) -> Routing {
    match request {
        Request::CategoryAdd { .. }
        | Request::CategoryRemove { .. }
        | Request::PermissionAdd { .. }
        | Request::PermissionRemove { .. }
        | Request::SectionAdd { .. }
        | Request::SectionRemove { .. }
        | Request::ActionAdd { .. }
        | Request::ActionRemove { .. }
        | Request::RightGrant { .. }
        | Request::RightRevoke { .. } => Routing::Inline,

        Request::KexInit { .. }
        | Request::RequestToken { .. }
        | Request::ActivateUser { .. }
        | Request::ChangePassword { .. }
        | Request::ResetPassword { .. }
        | Request::BasicAuth { .. }
        | Request::Authorize { .. }
        | Request::UpdateMap(_)
        | Request::CategoryList
        | Request::CategoryShow { .. }
        | Request::PermissionList { .. }
        | Request::PermissionShow { .. }
        | Request::PermissionSearch { .. }
        | Request::SectionList { .. }
        | Request::ActionList { .. }
        | Request::RightList { .. } => Routing::Concurrent,
    }
}
