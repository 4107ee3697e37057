use anyhow::anyhow;
use common::{Bet, PlatformStats, Poll, PollQuery, PotentialPoll, Tokens, User, UserStats};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::SettlementEngine;
use crate::error::EngineResult;

pub type Responder<T> = oneshot::Sender<anyhow::Result<T>>;

pub enum EngineRequest {
    Login {
        name: String,
        responder: Responder<User>,
    },
    Register {
        name: String,
        responder: Responder<User>,
    },
    GetUser {
        id: String,
        responder: Responder<Option<User>>,
    },
    UpdateWallet {
        user_id: String,
        address: String,
        responder: Responder<User>,
    },
    GetAllPolls {
        responder: Responder<Vec<Poll>>,
    },
    QueryPolls {
        query: PollQuery,
        responder: Responder<Vec<Poll>>,
    },
    TrendingPolls {
        limit: usize,
        responder: Responder<Vec<Poll>>,
    },
    GetPoll {
        id: String,
        responder: Responder<Option<Poll>>,
    },
    GetUserBets {
        user_id: String,
        responder: Responder<Vec<Bet>>,
    },
    CreatePoll {
        draft: PotentialPoll,
        actor: String,
        responder: Responder<Poll>,
    },
    PlaceBet {
        poll_id: String,
        option_id: String,
        amount: Tokens,
        actor: String,
        responder: Responder<Bet>,
    },
    QuoteReturn {
        poll_id: String,
        option_id: String,
        amount: Tokens,
        responder: Responder<Tokens>,
    },
    ResolvePoll {
        poll_id: String,
        winning_option_id: String,
        actor: String,
        responder: Responder<()>,
    },
    CancelPoll {
        poll_id: String,
        actor: String,
        responder: Responder<Tokens>,
    },
    GetPlatformStats {
        responder: Responder<PlatformStats>,
    },
    GetUserStats {
        user_id: String,
        responder: Responder<UserStats>,
    },
}

/// Owns the engine and applies requests to it one at a time.
pub struct EngineManager {
    engine: SettlementEngine,
    work_queue: mpsc::Receiver<EngineRequest>,
}

pub fn transform_err<T>(operation: &'static str, result: EngineResult<T>) -> anyhow::Result<T> {
    match result {
        Ok(t) => Ok(t),
        Err(e) => {
            warn!(operation, kind = ?e.kind(), "rejected: {}", e);
            Err(e.into())
        }
    }
}

//NOTE: No functions in this impl may crash
impl EngineManager {
    pub fn new(engine: SettlementEngine, work_queue: mpsc::Receiver<EngineRequest>) -> Self {
        Self { engine, work_queue }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            // we do not care if the receiver has already disappeared
            match request {
                EngineRequest::Login { name, responder } => {
                    let resp = transform_err("login", self.engine.login(&name));
                    if let Ok(user) = &resp {
                        info!(user_id = %user.id, "logged in");
                    }
                    let _ = responder.send(resp);
                }
                EngineRequest::Register { name, responder } => {
                    let resp = transform_err("register", self.engine.register(&name));
                    if let Ok(user) = &resp {
                        info!(user_id = %user.id, name = %user.name, "registered");
                    }
                    let _ = responder.send(resp);
                }
                EngineRequest::GetUser { id, responder } => {
                    let _ = responder.send(Ok(self.engine.user(&id).cloned()));
                }
                EngineRequest::UpdateWallet {
                    user_id,
                    address,
                    responder,
                } => {
                    let resp = transform_err(
                        "update_wallet",
                        self.engine.update_wallet_address(&user_id, &address),
                    );
                    let _ = responder.send(resp);
                }
                EngineRequest::GetAllPolls { responder } => {
                    let _ = responder.send(Ok(self.engine.polls().to_vec()));
                }
                EngineRequest::QueryPolls { query, responder } => {
                    let polls: Vec<Poll> =
                        self.engine.list_polls(&query).into_iter().cloned().collect();
                    debug!(?query, matched = polls.len(), "queried polls");
                    let _ = responder.send(Ok(polls));
                }
                EngineRequest::TrendingPolls { limit, responder } => {
                    let polls = self.engine.trending_polls(limit).into_iter().cloned().collect();
                    let _ = responder.send(Ok(polls));
                }
                EngineRequest::GetPoll { id, responder } => {
                    let _ = responder.send(Ok(self.engine.get_poll(&id).cloned()));
                }
                EngineRequest::GetUserBets { user_id, responder } => {
                    let bets = self.engine.get_user_bets(&user_id).into_iter().cloned().collect();
                    let _ = responder.send(Ok(bets));
                }
                EngineRequest::CreatePoll {
                    draft,
                    actor,
                    responder,
                } => {
                    let resp = transform_err("create_poll", self.engine.create_poll(draft, Some(&actor)));
                    if let Ok(poll) = &resp {
                        info!(poll_id = %poll.id, creator = %actor, fee = self.engine.config().creation_fee, "poll created");
                    }
                    let _ = responder.send(resp);
                }
                EngineRequest::PlaceBet {
                    poll_id,
                    option_id,
                    amount,
                    actor,
                    responder,
                } => {
                    let resp = transform_err(
                        "place_bet",
                        self.engine.place_bet(&poll_id, &option_id, amount, Some(&actor)),
                    );
                    if let Ok(bet) = &resp {
                        info!(bet_id = %bet.id, %poll_id, %option_id, amount, bettor = %actor, "bet placed");
                    }
                    let _ = responder.send(resp);
                }
                EngineRequest::QuoteReturn {
                    poll_id,
                    option_id,
                    amount,
                    responder,
                } => {
                    let resp = transform_err(
                        "quote_return",
                        self.engine.quote_return(&poll_id, &option_id, amount),
                    );
                    let _ = responder.send(resp);
                }
                EngineRequest::ResolvePoll {
                    poll_id,
                    winning_option_id,
                    actor,
                    responder,
                } => {
                    let resp = transform_err(
                        "resolve_poll",
                        self.engine.resolve_poll(&poll_id, &winning_option_id, Some(&actor)),
                    );
                    let resp = resp.map(|settlement| {
                        if settlement.is_unbacked() {
                            warn!(%poll_id, %winning_option_id, "resolved to an option nobody backed, no payouts");
                        }
                        info!(
                            %poll_id,
                            %winning_option_id,
                            pool = settlement.total_pool,
                            winners = settlement.winners().count(),
                            paid = settlement.total_paid(),
                            "poll resolved"
                        );
                    });
                    let _ = responder.send(resp);
                }
                EngineRequest::CancelPoll {
                    poll_id,
                    actor,
                    responder,
                } => {
                    let resp = transform_err("cancel_poll", self.engine.cancel_poll(&poll_id, Some(&actor)));
                    if let Ok(refunded) = &resp {
                        info!(%poll_id, refunded, "poll canceled");
                    }
                    let _ = responder.send(resp);
                }
                EngineRequest::GetPlatformStats { responder } => {
                    let _ = responder.send(Ok(self.engine.platform_stats()));
                }
                EngineRequest::GetUserStats { user_id, responder } => {
                    let _ = responder.send(Ok(self.engine.user_stats(&user_id)));
                }
            }
        }
        debug!("engine work queue closed");
    }
}

/// Cloneable front door to a running [`EngineManager`].
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub fn new(sender: mpsc::Sender<EngineRequest>) -> Self {
        Self { sender }
    }

    /// Builds a manager around `engine` and the handle that feeds it.
    pub fn channel(engine: SettlementEngine, queue_depth: usize) -> (Self, EngineManager) {
        let (tx, rx) = mpsc::channel(queue_depth);
        (Self::new(tx), EngineManager::new(engine, rx))
    }

    async fn call<T>(&self, request: impl FnOnce(Responder<T>) -> EngineRequest) -> anyhow::Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.sender
            .send(request(resp_tx))
            .await
            .map_err(|_| anyhow!("engine manager has shut down"))?;
        resp_rx.await?
    }

    pub async fn login(&self, name: String) -> anyhow::Result<User> {
        self.call(|responder| EngineRequest::Login { name, responder }).await
    }

    pub async fn register(&self, name: String) -> anyhow::Result<User> {
        self.call(|responder| EngineRequest::Register { name, responder }).await
    }

    pub async fn user(&self, id: String) -> anyhow::Result<Option<User>> {
        self.call(|responder| EngineRequest::GetUser { id, responder }).await
    }

    pub async fn update_wallet(&self, user_id: String, address: String) -> anyhow::Result<User> {
        self.call(|responder| EngineRequest::UpdateWallet {
            user_id,
            address,
            responder,
        })
        .await
    }

    pub async fn polls(&self) -> anyhow::Result<Vec<Poll>> {
        self.call(|responder| EngineRequest::GetAllPolls { responder }).await
    }

    pub async fn query_polls(&self, query: PollQuery) -> anyhow::Result<Vec<Poll>> {
        self.call(|responder| EngineRequest::QueryPolls { query, responder }).await
    }

    pub async fn trending_polls(&self, limit: usize) -> anyhow::Result<Vec<Poll>> {
        self.call(|responder| EngineRequest::TrendingPolls { limit, responder }).await
    }

    pub async fn poll(&self, id: String) -> anyhow::Result<Option<Poll>> {
        self.call(|responder| EngineRequest::GetPoll { id, responder }).await
    }

    pub async fn user_bets(&self, user_id: String) -> anyhow::Result<Vec<Bet>> {
        self.call(|responder| EngineRequest::GetUserBets { user_id, responder }).await
    }

    pub async fn create_poll(&self, draft: PotentialPoll, actor: String) -> anyhow::Result<Poll> {
        self.call(|responder| EngineRequest::CreatePoll {
            draft,
            actor,
            responder,
        })
        .await
    }

    pub async fn place_bet(
        &self,
        poll_id: String,
        option_id: String,
        amount: Tokens,
        actor: String,
    ) -> anyhow::Result<Bet> {
        self.call(|responder| EngineRequest::PlaceBet {
            poll_id,
            option_id,
            amount,
            actor,
            responder,
        })
        .await
    }

    pub async fn quote_return(
        &self,
        poll_id: String,
        option_id: String,
        amount: Tokens,
    ) -> anyhow::Result<Tokens> {
        self.call(|responder| EngineRequest::QuoteReturn {
            poll_id,
            option_id,
            amount,
            responder,
        })
        .await
    }

    pub async fn resolve_poll(
        &self,
        poll_id: String,
        winning_option_id: String,
        actor: String,
    ) -> anyhow::Result<()> {
        self.call(|responder| EngineRequest::ResolvePoll {
            poll_id,
            winning_option_id,
            actor,
            responder,
        })
        .await
    }

    pub async fn cancel_poll(&self, poll_id: String, actor: String) -> anyhow::Result<Tokens> {
        self.call(|responder| EngineRequest::CancelPoll {
            poll_id,
            actor,
            responder,
        })
        .await
    }

    pub async fn platform_stats(&self) -> anyhow::Result<PlatformStats> {
        self.call(|responder| EngineRequest::GetPlatformStats { responder }).await
    }

    pub async fn user_stats(&self, user_id: String) -> anyhow::Result<UserStats> {
        self.call(|responder| EngineRequest::GetUserStats { user_id, responder }).await
    }
}
