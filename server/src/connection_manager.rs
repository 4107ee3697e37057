use std::io::ErrorKind;

use anyhow::{anyhow, bail};
use common::network::{Connection, Packet, Request, Response};
use common::User;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::deposit::DepositDesk;
use crate::engine_manager::EngineHandle;
use crate::error::EngineError;

pub async fn handle_listen_server(
    listener: TcpListener,
    engine: EngineHandle,
    deposits: DepositDesk,
) -> anyhow::Result<()> {
    info!(address = %listener.local_addr()?, "listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        let deposits = deposits.clone();

        tokio::spawn(async move {
            let connection = match Connection::from_tcp_stream(stream).await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(%peer, "websocket handshake failed: {}", e);
                    return;
                }
            };
            debug!(%peer, "connection opened");
            handle_connection(connection, engine, deposits).await;
            debug!(%peer, "connection closed");
        });
    }
}

async fn handle_connection(mut connection: Connection, engine: EngineHandle, deposits: DepositDesk) {
    let user = handle_login(&mut connection, &engine).await;
    let outcome = match user {
        Ok(user) => handle_client(user, &mut connection, &engine, &deposits).await,
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        warn!("dropping client: {}", e);
        let packet = match rejection(&e) {
            Some(response) => Packet::ResponsePacket(response),
            None => Packet::Error,
        };
        // the peer may already be gone
        connection.send(packet).await.ok();
    }
}

async fn handle_login(connection: &mut Connection, engine: &EngineHandle) -> anyhow::Result<User> {
    let packet = connection.read().await?;
    if let Packet::RequestPacket(request) = packet {
        let user = match request {
            Request::Login { user } => engine.login(user).await,
            Request::Register { user } => engine.register(user).await,
            _ => {
                bail!("bad login");
            }
        };
        let user = user?;
        connection
            .send(Packet::ResponsePacket(Response::SuccessfulLogin(user.clone())))
            .await?;
        Ok(user)
    } else {
        bail!("Invalid request at login: {:?}", packet);
    }
}

async fn handle_client(
    user: User,
    connection: &mut Connection,
    engine: &EngineHandle,
    deposits: &DepositDesk,
) -> anyhow::Result<()> {
    let user_id = user.id;
    loop {
        let packet = connection.read().await;
        if let Ok(Packet::RequestPacket(request)) = packet {
            if let Request::Login { .. } | Request::Register { .. } = request {
                warn!(%user_id, "duplicate login detected");
                bail!("Attempted re-login - denied");
            }
            let response = match dispatch(request, &user_id, engine, deposits).await {
                Ok(response) => response,
                Err(e) => rejection(&e).ok_or(e)?,
            };
            connection.send(Packet::ResponsePacket(response)).await?;
        } else {
            return match packet {
                Ok(pack) => bail!("incorrect packet type: {:?}", pack),
                Err(error) => {
                    match error
                        .downcast_ref::<std::io::Error>()
                        .map(|e| e.kind())
                    {
                        Some(ErrorKind::ConnectionAborted) => Ok(()), //connection aborted is considered successful,
                        _ => {
                            error!(%user_id, "connection failed: {}", error);
                            Err(error)
                        }
                    }
                }
            };
        }
    }
}

async fn dispatch(
    request: Request,
    user_id: &str,
    engine: &EngineHandle,
    deposits: &DepositDesk,
) -> anyhow::Result<Response> {
    let actor = user_id.to_string();
    let response = match request {
        Request::Login { .. } | Request::Register { .. } => bail!("already logged in"),
        Request::WhoAmI => {
            let user = engine
                .user(actor)
                .await?
                .ok_or(anyhow!("logged in user {} vanished", user_id))?;
            Response::WhoAmI(user)
        }
        Request::PollData => Response::PollData(engine.polls().await?),
        Request::QueryPolls(query) => Response::PollData(engine.query_polls(query).await?),
        Request::GetPoll { poll_id } => Response::Poll(engine.poll(poll_id).await?),
        Request::TrendingPolls { limit } => Response::PollData(engine.trending_polls(limit).await?),
        Request::MyBets => Response::Bets(engine.user_bets(actor).await?),
        Request::CreatePoll(draft) => Response::PollCreated(engine.create_poll(draft, actor).await?),
        Request::PlaceBet {
            poll_id,
            option_id,
            amount,
        } => Response::BetPlaced(engine.place_bet(poll_id, option_id, amount, actor).await?),
        Request::QuoteReturn {
            poll_id,
            option_id,
            amount,
        } => Response::Quote(engine.quote_return(poll_id, option_id, amount).await?),
        Request::ResolvePoll {
            poll_id,
            winning_option_id,
        } => {
            engine.resolve_poll(poll_id, winning_option_id, actor).await?;
            Response::None
        }
        Request::CancelPoll { poll_id } => {
            engine.cancel_poll(poll_id, actor).await?;
            Response::None
        }
        Request::PlatformStats => Response::PlatformStats(engine.platform_stats().await?),
        Request::MyStats => Response::UserStats(engine.user_stats(actor).await?),
        Request::UpdateWallet { address } => Response::WhoAmI(engine.update_wallet(actor, address).await?),
        Request::DepositAddress => Response::DepositAddress(deposits.deposit_address(user_id)),
        Request::VerifyDeposit { tx_hash } => {
            Response::DepositVerified(deposits.verify_deposit(&tx_hash).await)
        }
        Request::TokenMetrics => Response::TokenMetrics(deposits.metrics()),
    };
    Ok(response)
}

/// Engine rejections are answered in-band; anything else ends the connection.
fn rejection(error: &anyhow::Error) -> Option<Response> {
    error.downcast_ref::<EngineError>().map(|e| Response::Rejected {
        kind: e.kind(),
        message: e.to_string(),
    })
}
