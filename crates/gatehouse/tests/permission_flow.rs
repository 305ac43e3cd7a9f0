//! Permission graph lifecycle and grant linearization through the
//! dispatcher.

use std::sync::Arc;

use gatehouse::{ReplyBody, Request};
use gatehouse_core::{Category, GrantId, ObjectId, Recipient, TeamId, UserId, Verdict};
use gatehouse_testkit::TestHarness;

#[tokio::test]
async fn category_lifecycle_creates_and_removes_machinery() {
    let harness = TestHarness::start().await;
    let cat = Category::new("deploys");

    let reply = harness.send(Request::CategoryAdd { name: cat.clone() }).await;
    assert_eq!(reply.verdict, Verdict::Ok);

    // The category, its meta-category, and its system permission resolve.
    for name in [cat.clone(), cat.grant_meta()] {
        let reply = harness.send(Request::CategoryShow { name }).await;
        assert_eq!(reply.verdict, Verdict::Ok);
    }
    let reply = harness
        .send(Request::PermissionShow {
            category: Category::new("system"),
            name: "deploys".into(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Ok);

    // Teardown removes all of it.
    let reply = harness.send(Request::CategoryRemove { name: cat.clone() }).await;
    assert_eq!(reply.verdict, Verdict::Ok);

    let reply = harness.send(Request::CategoryShow { name: cat.clone() }).await;
    assert_eq!(reply.verdict, Verdict::NotFound);
    let reply = harness
        .send(Request::CategoryShow {
            name: cat.grant_meta(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::NotFound);
    let reply = harness
        .send(Request::PermissionShow {
            category: Category::new("system"),
            name: "deploys".into(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::NotFound);

    harness.stop().await;
}

#[tokio::test]
async fn grant_authorize_revoke_roundtrip() {
    let harness = TestHarness::start().await;
    let cat = Category::new("repository");

    let reply = harness
        .send(Request::PermissionAdd {
            category: cat.clone(),
            name: "push".into(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Ok);

    let reply = harness
        .send(Request::RightGrant {
            recipient: Recipient::User(UserId(9)),
            category: cat.clone(),
            permission: "push".into(),
            object: Some(ObjectId(42)),
        })
        .await;
    let grant = match reply.body {
        ReplyBody::Grant(grant) => grant,
        other => panic!("expected grant, got {other:?}"),
    };

    let authorize = |object| Request::Authorize {
        user: UserId(9),
        category: cat.clone(),
        permission: "push".into(),
        object,
    };
    assert_eq!(
        harness.send(authorize(Some(ObjectId(42)))).await.verdict,
        Verdict::Ok
    );
    assert_eq!(
        harness.send(authorize(Some(ObjectId(43)))).await.verdict,
        Verdict::Forbidden
    );

    let reply = harness
        .send(Request::RightRevoke {
            recipient: Recipient::User(UserId(9)),
            grant: grant.id,
            category: cat.clone(),
            permission: "push".into(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Ok);
    assert_eq!(
        harness.send(authorize(Some(ObjectId(42)))).await.verdict,
        Verdict::Forbidden
    );

    harness.stop().await;
}

#[tokio::test]
async fn concurrent_identical_grants_are_linearized() {
    let harness = Arc::new(TestHarness::start().await);
    let cat = Category::new("global");

    let reply = harness
        .send(Request::PermissionAdd {
            category: cat.clone(),
            name: "shutdown".into(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Ok);

    // Sixteen clients race the same grant triple. The inline routing of
    // grant mutations serializes them: exactly one wins, the rest see the
    // duplicate.
    let mut handles = Vec::new();
    for _ in 0..16 {
        let harness = Arc::clone(&harness);
        let cat = cat.clone();
        handles.push(tokio::spawn(async move {
            harness
                .send(Request::RightGrant {
                    recipient: Recipient::User(UserId(9)),
                    category: cat,
                    permission: "shutdown".into(),
                    object: None,
                })
                .await
                .verdict
        }));
    }

    let mut ok = 0;
    let mut conflict = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Verdict::Ok => ok += 1,
            Verdict::Conflict => conflict += 1,
            other => panic!("unexpected verdict {other:?}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflict, 15);

    // Exactly one grant row exists.
    let reply = harness
        .send(Request::RightList {
            recipient: Recipient::User(UserId(9)),
        })
        .await;
    match reply.body {
        ReplyBody::Grants(grants) => assert_eq!(grants.len(), 1),
        other => panic!("expected grants, got {other:?}"),
    }

    Arc::try_unwrap(harness)
        .unwrap_or_else(|_| panic!("harness still shared"))
        .stop()
        .await;
}

#[tokio::test]
async fn team_recipients_report_not_implemented() {
    let harness = TestHarness::start().await;
    harness.seed_team(3, "platform").await;

    let reply = harness
        .send(Request::RightGrant {
            recipient: Recipient::Team(TeamId(3)),
            category: Category::new("global"),
            permission: "anything".into(),
            object: None,
        })
        .await;
    assert_eq!(reply.verdict, Verdict::NotImplemented);

    let reply = harness
        .send(Request::RightRevoke {
            recipient: Recipient::Team(TeamId(3)),
            grant: GrantId(1),
            category: Category::new("global"),
            permission: "anything".into(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::NotImplemented);

    harness.stop().await;
}

#[tokio::test]
async fn unauthenticated_mutations_are_refused() {
    let harness = TestHarness::start().await;

    let reply = harness
        .send_anonymous(Request::CategoryAdd {
            name: Category::new("deploys"),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Unauthorized);

    let reply = harness
        .send_anonymous(Request::PermissionAdd {
            category: Category::new("global"),
            name: "shutdown".into(),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Unauthorized);

    harness.stop().await;
}

#[tokio::test]
async fn sections_and_actions_lifecycle() {
    let harness = TestHarness::start().await;
    let cat = Category::new("monitoring");

    let reply = harness
        .send(Request::SectionAdd {
            category: cat.clone(),
            name: "probes".into(),
        })
        .await;
    let section = match reply.body {
        ReplyBody::Section(section) => section,
        other => panic!("expected section id, got {other:?}"),
    };

    for action in ["update", "silence"] {
        let reply = harness
            .send(Request::ActionAdd {
                section,
                name: action.into(),
            })
            .await;
        assert_eq!(reply.verdict, Verdict::Ok);
    }

    let reply = harness.send(Request::ActionList { section }).await;
    match reply.body {
        ReplyBody::Actions(actions) => assert_eq!(actions.len(), 2),
        other => panic!("expected actions, got {other:?}"),
    }

    let reply = harness.send(Request::SectionRemove { section }).await;
    assert_eq!(reply.verdict, Verdict::Ok);
    let reply = harness.send(Request::SectionList { category: cat }).await;
    match reply.body {
        ReplyBody::Sections(sections) => assert!(sections.is_empty()),
        other => panic!("expected sections, got {other:?}"),
    }

    harness.stop().await;
}
