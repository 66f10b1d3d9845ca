mod common;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use livequiz_api::client::{
    ConnectionState, DepartmentFeed, GuestFlow, GuestIntake, HttpLiveQuizApi, LiveQuizApi, MemoryGuestStore,
    ParticipantSession, RealtimeChannel, RoomSubscription, SessionController, SubmitAs,
};
use livequiz_api::models::answer::AnswerItem;
use livequiz_api::models::live_quiz::CreateLiveQuizRequest;
use livequiz_api::models::{
    ClientMessage, EndReason, ParticipantIdentity, QuizStatus, RoomId, ServerMessage,
};
use livequiz_api::utils::retry::RetryConfig;

const WAIT: Duration = Duration::from_secs(5);

async fn next_matching<F>(subscription: &mut RoomSubscription, mut pred: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    timeout(WAIT, async {
        loop {
            let message = subscription.next().await.expect("subscription closed");
            if pred(&message) {
                return message;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn roster_ids(message: &ServerMessage) -> Vec<String> {
    match message {
        ServerMessage::Roster { participants, .. } => participants
            .iter()
            .map(|p| p.participant_id.clone())
            .collect(),
        _ => Vec::new(),
    }
}

fn admin_api(server: &common::TestServer) -> Arc<HttpLiveQuizApi> {
    Arc::new(
        HttpLiveQuizApi::new(&server.http_url())
            .unwrap()
            .with_token(common::admin_token()),
    )
}

async fn create(api: &HttpLiveQuizApi, title: &str, department: Option<&str>, time_limit: Option<i64>) -> String {
    api.create(&CreateLiveQuizRequest {
        title: title.to_string(),
        department_id: department.map(str::to_string),
        time_limit,
    })
    .await
    .unwrap()
    .quiz_id
}

#[tokio::test]
async fn test_join_receives_snapshot_and_roster_updates() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Roster", None, None).await;
    let room = RoomId::quiz(&quiz_id);

    let ann = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut ann_room = ann
        .join_room(room.clone(), Some(ParticipantIdentity::registered("u-ann", "Ann")))
        .unwrap();

    let joined = next_matching(&mut ann_room, |m| matches!(m, ServerMessage::Joined { .. })).await;
    match joined {
        ServerMessage::Joined { session, .. } => assert_eq!(session.status, QuizStatus::Draft),
        other => panic!("unexpected {:?}", other),
    }
    let roster = next_matching(&mut ann_room, |m| matches!(m, ServerMessage::Roster { .. })).await;
    assert_eq!(roster_ids(&roster), vec!["u-ann".to_string()]);

    // same display name, different participant: both stay on the roster
    let other = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let _other_room = other
        .join_room(room.clone(), Some(ParticipantIdentity::guest("guest-1", "Ann")))
        .unwrap();

    let roster = next_matching(&mut ann_room, |m| roster_ids(m).len() == 2).await;
    assert!(roster_ids(&roster).contains(&"guest-1".to_string()));
}

#[tokio::test]
async fn test_two_connections_one_participant() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Tabs", None, None).await;
    let room = RoomId::quiz(&quiz_id);
    let identity = ParticipantIdentity::registered("u-1", "Sam");

    let first = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let second = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut first_room = first.join_room(room.clone(), Some(identity.clone())).unwrap();
    next_matching(&mut first_room, |m| matches!(m, ServerMessage::Roster { .. })).await;
    let mut second_room = second.join_room(room.clone(), Some(identity)).unwrap();
    let roster = next_matching(&mut second_room, |m| matches!(m, ServerMessage::Roster { .. })).await;
    assert_eq!(roster_ids(&roster), vec!["u-1".to_string()]);

    second.leave_room(&room).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(api.roster(&quiz_id).await.unwrap().len(), 1);

    drop(first_room);
    let observer = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut watching = observer.join_room(room, None).unwrap();
    next_matching(&mut watching, |m| matches!(m, ServerMessage::Roster { .. }) && roster_ids(m).is_empty()).await;
}

#[tokio::test]
async fn test_admin_start_pushes_status_and_timer() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Timed", None, Some(30)).await;

    let channel = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut room = channel.join_room(RoomId::quiz(&quiz_id), None).unwrap();
    next_matching(&mut room, |m| matches!(m, ServerMessage::Joined { .. })).await;

    let controller = SessionController::new(api.clone(), quiz_id.clone());
    controller.refresh().await.unwrap();
    controller.start().await.unwrap();
    assert!(controller.is_tentative());

    let status = next_matching(&mut room, |m| matches!(m, ServerMessage::Status { is_live: true, .. })).await;
    assert!(controller.apply_event(&status));
    assert!(!controller.is_tentative());
    assert!(controller.is_live());

    let timer = next_matching(&mut room, |m| matches!(m, ServerMessage::TimerSnapshot { .. })).await;
    match timer {
        ServerMessage::TimerSnapshot { snapshot, .. } => {
            assert_eq!(snapshot.total_seconds, 30);
            assert!(snapshot.remaining_seconds <= 30);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_timer_expiry_ends_room() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Quick", None, Some(1)).await;

    let channel = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut room = channel.join_room(RoomId::quiz(&quiz_id), None).unwrap();
    next_matching(&mut room, |m| matches!(m, ServerMessage::Joined { .. })).await;
    api.start(&quiz_id).await.unwrap();

    let ended = next_matching(&mut room, |m| matches!(m, ServerMessage::Ended { .. })).await;
    assert!(matches!(ended, ServerMessage::Ended { reason: EndReason::TimeUp, .. }));
    assert_eq!(api.get(&quiz_id).await.unwrap().status, QuizStatus::Completed);

    // late joiners see the terminal state straight away
    let late = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut late_room = late.join_room(RoomId::quiz(&quiz_id), None).unwrap();
    next_matching(&mut late_room, |m| matches!(m, ServerMessage::Ended { .. })).await;
}

#[tokio::test]
async fn test_unknown_quiz_gets_error_notice() {
    let server = common::TestServer::start().await;
    let channel = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut room = channel.join_room(RoomId::quiz("does-not-exist"), None).unwrap();

    let notice = next_matching(&mut room, |m| matches!(m, ServerMessage::ErrorNotice { .. })).await;
    assert!(matches!(notice, ServerMessage::ErrorNotice { room: Some(_), .. }));

    channel.ping().unwrap();
    assert_eq!(channel.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnected_participant_pruned_after_grace() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Grace", None, None).await;
    let room = RoomId::quiz(&quiz_id);

    // a bare socket, so nothing sends `leave` when it goes away
    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();
    let join = ClientMessage::Join {
        room: room.clone(),
        identity: Some(ParticipantIdentity::guest("guest-9", "Lee")),
    };
    socket
        .send(Message::text(serde_json::to_string(&join).unwrap()))
        .await
        .unwrap();

    let observer = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut watching = observer.join_room(room, None).unwrap();
    next_matching(&mut watching, |m| roster_ids(m) == vec!["guest-9".to_string()]).await;

    drop(socket);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(api.roster(&quiz_id).await.unwrap().len(), 1);

    next_matching(&mut watching, |m| matches!(m, ServerMessage::Roster { .. }) && roster_ids(m).is_empty()).await;
}

#[tokio::test]
async fn test_dispose_leaves_without_waiting_for_grace() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Teardown", None, None).await;
    let room = RoomId::quiz(&quiz_id);

    let leaving = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut leaving_room = leaving
        .join_room(room.clone(), Some(ParticipantIdentity::guest("g1", "Lee")))
        .unwrap();
    next_matching(&mut leaving_room, |m| roster_ids(m) == vec!["g1".to_string()]).await;

    let observer = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut watching = observer.join_room(room, None).unwrap();
    next_matching(&mut watching, |m| roster_ids(m) == vec!["g1".to_string()]).await;

    leaving.dispose();
    assert_eq!(leaving.state(), ConnectionState::Closed);

    // well inside the one second disconnect grace
    timeout(
        Duration::from_millis(600),
        next_matching(&mut watching, |m| matches!(m, ServerMessage::Roster { .. }) && roster_ids(m).is_empty()),
    )
    .await
    .expect("leave was not sent on dispose");
    assert!(api.roster(&quiz_id).await.unwrap().is_empty());
    drop(leaving_room);
}

#[tokio::test]
async fn test_department_feed_tracks_live_quizzes() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Ops drill", Some("ops"), None).await;

    let channel = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut feed = DepartmentFeed::new("ops");
    let mut subscription = channel.join_room(feed.room().clone(), None).unwrap();

    api.start(&quiz_id).await.unwrap();
    let live = timeout(WAIT, feed.next_change(&mut subscription)).await.unwrap().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].quiz_id, quiz_id);

    api.end(&quiz_id).await.unwrap();
    let live = timeout(WAIT, feed.next_change(&mut subscription)).await.unwrap().unwrap();
    assert!(live.is_empty());
}

#[tokio::test]
async fn test_guest_participant_runs_to_end_and_submits() {
    let server = common::TestServer::start().await;
    let api = admin_api(&server);
    let quiz_id = create(&api, "Guest run", None, None).await;
    api.start(&quiz_id).await.unwrap();

    let mut flow = GuestFlow::new(MemoryGuestStore::default());
    let guest = flow
        .identify(&GuestIntake::new("Ann").email("a@b.com"))
        .unwrap();
    let guest_api = Arc::new(HttpLiveQuizApi::new(&server.http_url()).unwrap());
    let mut participant = ParticipantSession::new(guest_api, quiz_id.clone(), SubmitAs::Guest(guest))
        .with_redirect_after(Duration::from_millis(10));

    let channel = RealtimeChannel::connect(&server.ws_url()).await.unwrap();
    let mut subscription = channel
        .join_room(participant.room().clone(), Some(participant.identity()))
        .unwrap();
    let joined = next_matching(&mut subscription, |m| matches!(m, ServerMessage::Joined { .. })).await;
    participant.on_event(&joined).await;
    participant
        .record_answer(AnswerItem {
            question_id: "q-1".to_string(),
            answer_text: "42".to_string(),
            time_taken: 2,
        })
        .unwrap();

    let ender = api.clone();
    let ending_quiz = quiz_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        ender.end(&ending_quiz).await.unwrap();
    });

    let outcome = timeout(WAIT, participant.run(subscription)).await.unwrap();
    assert_eq!(outcome.reason, Some(EndReason::Manual));
    assert!(outcome.submitted);
    assert_eq!(outcome.receipt.unwrap().accepted, 1);

    let submissions = server.state.answers.submissions(&quiz_id).await.unwrap();
    assert_eq!(submissions.len(), 1);
}

#[tokio::test]
async fn test_reconnect_rejoins_with_same_identity() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (joins_tx, mut joins_rx) = tokio::sync::mpsc::unbounded_channel::<ClientMessage>();

    tokio::spawn(async move {
        for round in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    let message: ClientMessage = serde_json::from_str(text.as_str()).unwrap();
                    if matches!(message, ClientMessage::Join { .. }) {
                        joins_tx.send(message).unwrap();
                        if round == 0 {
                            // drop the first connection right after the join
                            let _ = ws.close(None).await;
                            break;
                        }
                        let reply = json!({"type": "status", "room": {"kind": "quiz", "id": "q1"}, "status": "live", "isLive": true});
                        ws.send(Message::text(reply.to_string())).await.unwrap();
                    }
                }
            }
        }
    });

    let quick = RetryConfig {
        max_attempts: 20,
        base_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        jitter_max: None,
    };
    let channel = RealtimeChannel::connect_with(&url, quick.clone(), quick).await.unwrap();
    let identity = ParticipantIdentity::guest("guest-7", "Sam");
    let mut room = channel.join_room(RoomId::quiz("q1"), Some(identity.clone())).unwrap();

    let first = timeout(WAIT, joins_rx.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, joins_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(
        second,
        ClientMessage::Join {
            room: RoomId::quiz("q1"),
            identity: Some(identity)
        }
    );

    let status = next_matching(&mut room, |m| matches!(m, ServerMessage::Status { .. })).await;
    assert!(matches!(status, ServerMessage::Status { is_live: true, .. }));
    assert_eq!(channel.state(), ConnectionState::Connected);
}
