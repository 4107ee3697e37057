use std::time::Duration;

use chrono::Utc;
use common::network::{Connection, Packet, Request, Response};
use common::{BetStatus, ErrorKind, PotentialPoll, User};
use settlement_server::connection_manager::handle_listen_server;
use settlement_server::deposit::DepositDesk;
use settlement_server::engine::SystemClock;
use settlement_server::{EngineConfig, EngineHandle, Seed, SettlementEngine};
use tokio::net::TcpListener;

async fn start_server(seed: Seed) -> String {
    let engine = SettlementEngine::from_seed(seed, EngineConfig::default(), SystemClock).unwrap();
    let (handle, mut manager) = EngineHandle::channel(engine, 32);
    tokio::spawn(async move {
        manager.manage().await;
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("ws://{}", listener.local_addr().unwrap());
    let deposits = DepositDesk::new(Duration::from_millis(10));
    tokio::spawn(async move { handle_listen_server(listener, handle, deposits).await });
    address
}

async fn login(address: &str, name: &str) -> (Connection, User) {
    let mut connection = Connection::connect(address).await.unwrap();
    match connection
        .request(Request::Login { user: name.into() })
        .await
        .unwrap()
    {
        Response::SuccessfulLogin(user) => (connection, user),
        other => panic!("login failed: {:?}", other),
    }
}

async fn balance(connection: &mut Connection) -> f64 {
    match connection.request(Request::WhoAmI).await.unwrap() {
        Response::WhoAmI(user) => user.balance,
        other => panic!("unexpected response {:?}", other),
    }
}

fn rejected_kind(response: Response) -> ErrorKind {
    match response {
        Response::Rejected { kind, .. } => kind,
        other => panic!("expected a rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn bet_and_settle_over_the_wire() {
    let address = start_server(Seed::demo(Utc::now())).await;
    let (mut player, user) = login(&address, "user").await;
    assert_eq!(user.balance, 500.0);

    let bet = match player
        .request(Request::PlaceBet {
            poll_id: "1".into(),
            option_id: "1a".into(),
            amount: 200.0,
        })
        .await
        .unwrap()
    {
        Response::BetPlaced(bet) => bet,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(bet.status, BetStatus::Active);
    assert_eq!(balance(&mut player).await, 300.0);

    let response = player
        .request(Request::PlaceBet {
            poll_id: "1".into(),
            option_id: "1a".into(),
            amount: 0.0,
        })
        .await
        .unwrap();
    assert_eq!(rejected_kind(response), ErrorKind::Validation);

    let response = player
        .request(Request::ResolvePoll {
            poll_id: "1".into(),
            winning_option_id: "1a".into(),
        })
        .await
        .unwrap();
    assert_eq!(rejected_kind(response), ErrorKind::Authorization);

    let (mut admin, _) = login(&address, "admin").await;
    assert_eq!(
        admin
            .request(Request::ResolvePoll {
                poll_id: "1".into(),
                winning_option_id: "1a".into(),
            })
            .await
            .unwrap(),
        Response::None
    );
    let response = admin
        .request(Request::ResolvePoll {
            poll_id: "1".into(),
            winning_option_id: "1b".into(),
        })
        .await
        .unwrap();
    assert_eq!(rejected_kind(response), ErrorKind::State);

    let bets = match player.request(Request::MyBets).await.unwrap() {
        Response::Bets(bets) => bets,
        other => panic!("unexpected response {:?}", other),
    };
    let total: f64 = bets.iter().filter_map(|bet| bet.payout).sum();
    assert!(bets.iter().all(|bet| bet.status != BetStatus::Active));
    assert!((balance(&mut player).await - (300.0 + total)).abs() < 1e-6);
}

#[tokio::test]
async fn unknown_users_are_turned_away() {
    let address = start_server(Seed::demo(Utc::now())).await;
    let mut connection = Connection::connect(&address).await.unwrap();
    let response = connection
        .request(Request::Login {
            user: "mallory".into(),
        })
        .await
        .unwrap();
    assert_eq!(rejected_kind(response), ErrorKind::NotFound);
}

#[tokio::test]
async fn second_login_ends_the_session() {
    let address = start_server(Seed::demo(Utc::now())).await;
    let (mut connection, _) = login(&address, "user").await;
    connection
        .send(Packet::RequestPacket(Request::Login {
            user: "admin".into(),
        }))
        .await
        .unwrap();
    assert_eq!(connection.read().await.unwrap(), Packet::Error);
}

#[tokio::test]
async fn registration_and_poll_creation() {
    let address = start_server(Seed::demo(Utc::now())).await;
    let mut connection = Connection::connect(&address).await.unwrap();
    let user = match connection
        .request(Request::Register {
            user: "newcomer".into(),
        })
        .await
        .unwrap()
    {
        Response::SuccessfulLogin(user) => user,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(user.balance, 100.0);

    let response = connection
        .request(Request::CreatePoll(PotentialPoll {
            title: "Will it snow?".into(),
            description: "Any snow at all counts.".into(),
            category: "Weather".into(),
            end_time: Some(Utc::now() + chrono::Duration::days(1)),
            options: vec!["Yes".into(), "No".into()],
        }))
        .await
        .unwrap();
    assert_eq!(rejected_kind(response), ErrorKind::Authorization);
    assert_eq!(balance(&mut connection).await, 100.0);

    match connection.request(Request::DepositAddress).await.unwrap() {
        Response::DepositAddress(address) => assert!(address.starts_with(&format!("xM{}", user.id))),
        other => panic!("unexpected response {:?}", other),
    }
    assert_eq!(
        connection
            .request(Request::VerifyDeposit {
                tx_hash: "0xfeed".into()
            })
            .await
            .unwrap(),
        Response::DepositVerified(true)
    );
}
