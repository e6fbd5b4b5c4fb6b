mod common;

use std::sync::Arc;

use arthur::bootstrap::{BootstrapOutcome, Enrollment, EnrollmentSettings, ENROLLMENT_FAILED};
use arthur::discord::{CommunityPlatform, Permissions};
use arthur::model::BootstrapKind;
use arthur::notifier::{ChannelSettings, Notifier, BOOTSTRAP_BUTTON_ID};
use arthur::report;
use common::*;

fn notifier(platform: &RecordingPlatform) -> Notifier {
    let shared: Arc<dyn CommunityPlatform> = Arc::new(platform.clone());
    Notifier::new(shared, BOOTSTRAP_CHANNEL, BOT_ID)
}

fn enrollment(directory: &RecordingDirectory, platform: &RecordingPlatform) -> Enrollment {
    Enrollment::new(
        Arc::new(directory.clone()),
        notifier(platform),
        EnrollmentSettings {
            gating_role_id: GATE,
            mapping: mapping(),
            mail_domain: Some("pydis.wtf".into()),
            login_url: "https://id.example/account".into(),
            call_timeout: CALL_TIMEOUT,
        },
    )
}

fn channel_settings() -> ChannelSettings {
    ChannelSettings {
        devops_role_id: DEVOPS_ROLE,
        devops_channel_id: DEVOPS_CHANNEL,
        login_url: "https://id.example/account".into(),
        mapping: mapping(),
    }
}

#[tokio::test]
async fn member_without_gating_role_is_not_eligible() {
    let directory = RecordingDirectory::default();
    let platform = RecordingPlatform::default();
    let flow = enrollment(&directory, &platform);

    let outcome = flow.bootstrap(&member(2, "alice", &[DEVOPS_ROLE])).await.unwrap();

    assert_eq!(outcome, BootstrapOutcome::NotEligible);
    assert!(directory.calls().await.is_empty());
    assert_eq!(
        flow.respond(&member(2, "alice", &[DEVOPS_ROLE])).await,
        report::NOT_ELIGIBLE
    );
}

#[tokio::test]
async fn new_member_gets_account_and_prompt_is_retracted() {
    let directory = RecordingDirectory::default();
    let platform = RecordingPlatform::default();
    let other = platform.push_history(BOT_ID, "Hi <@7>! You have roles").await;
    let prompt = platform.push_history(BOT_ID, "Hi <@2>! You have roles").await;
    let flow = enrollment(&directory, &platform);

    let outcome = flow
        .bootstrap(&member(2, "alice", &[GATE, DEVOPS_ROLE, MODS_ROLE]))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        BootstrapOutcome::Issued {
            kind: BootstrapKind::Creation,
            username: "alice".into(),
            password: "created-pw".into(),
        }
    );
    assert_eq!(
        directory.calls().await,
        vec![DirectoryCall::Create {
            uid: "alice".into(),
            groups: groups(&["devops", "moderators"]),
            key: "2".into(),
        }]
    );
    assert_eq!(*platform.deleted.lock().await, vec![prompt]);
    assert!(platform.history.lock().await.iter().any(|m| m.id == other));
}

#[tokio::test]
async fn existing_account_gets_password_reset() {
    let directory = RecordingDirectory::with_users(vec![account("alice.l", Some(2), &["devops"])]);
    let platform = RecordingPlatform::default();
    let flow = enrollment(&directory, &platform);

    let text = flow.respond(&member(2, "alice", &[GATE, DEVOPS_ROLE])).await;

    assert_eq!(directory.calls().await, vec![DirectoryCall::Reset("alice.l".into())]);
    assert!(text.starts_with("## Password Reset"));
    assert!(text.contains("`alice.l@pydis.wtf`"));
    assert!(text.contains("||`reset-pw`||"));
    assert!(platform.deleted.lock().await.is_empty());
}

#[tokio::test]
async fn creation_reply_contains_credentials() {
    let directory = RecordingDirectory::default();
    let platform = RecordingPlatform::default();
    let flow = enrollment(&directory, &platform);

    let text = flow.respond(&member(2, "alice", &[GATE, DEVOPS_ROLE])).await;

    assert!(text.starts_with("## Account Creation"));
    assert!(text.contains("`alice@pydis.wtf`"));
    assert!(text.contains("||`created-pw`||"));
    assert!(text.contains("<https://id.example/account>"));
}

#[tokio::test]
async fn directory_failure_is_not_leaked() {
    let directory = RecordingDirectory::default();
    directory.fail_for("alice").await;
    let platform = RecordingPlatform::default();
    let flow = enrollment(&directory, &platform);

    let text = flow.respond(&member(2, "alice", &[GATE, DEVOPS_ROLE])).await;

    assert_eq!(text, ENROLLMENT_FAILED);
    assert!(!text.contains("write to alice failed"));
}

#[tokio::test]
async fn bootstrap_channel_is_set_up_once() {
    let directory = RecordingDirectory::with_users(vec![account("carol", Some(4), &["devops"])]);
    let platform = RecordingPlatform::default();
    let enrolled = platform.push_history(BOT_ID, "Hi <@4>! You have roles").await;
    platform.push_history(BOT_ID, "Hi <@5>! You have roles").await;
    let notifier = notifier(&platform);

    notifier
        .ensure_bootstrap_channel(&directory, &channel_settings())
        .await
        .unwrap();

    assert_eq!(platform.topics.lock().await.len(), 1);
    let sent = platform.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].content().starts_with(report::BOOTSTRAP_HEADER));
    let button = sent[0].message.button.as_ref().unwrap();
    assert_eq!(button.custom_id, BOOTSTRAP_BUTTON_ID);
    assert_eq!(*platform.deleted.lock().await, vec![enrolled]);

    let overwrites = platform.overwrites.lock().await.clone();
    assert_eq!(overwrites.len(), 2);
    let devops = overwrites.iter().find(|(role, _, _)| *role == DEVOPS_ROLE).unwrap();
    assert!(devops.1.contains(Permissions::MANAGE_CHANNELS));
    let mods = overwrites.iter().find(|(role, _, _)| *role == MODS_ROLE).unwrap();
    assert_eq!(mods.2, Permissions::SEND_MESSAGES);

    // Second run finds the message it posted and leaves it alone.
    notifier
        .ensure_bootstrap_channel(&directory, &channel_settings())
        .await
        .unwrap();
    assert_eq!(platform.sent().await.len(), 1);
    assert!(platform.edited.lock().await.is_empty());
}

#[tokio::test]
async fn drifted_bootstrap_message_is_edited() {
    let directory = RecordingDirectory::default();
    let platform = RecordingPlatform::default();
    let stale = platform
        .push_history(BOT_ID, &format!("{}\nold instructions", report::BOOTSTRAP_HEADER))
        .await;

    notifier(&platform)
        .ensure_bootstrap_channel(&directory, &channel_settings())
        .await
        .unwrap();

    assert_eq!(*platform.edited.lock().await, vec![stale]);
    assert!(platform.sent().await.is_empty());
}
