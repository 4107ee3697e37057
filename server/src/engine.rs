//! Owns every poll and bet; the only place they are mutated.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{
    Bet, BetStatus, PlatformStats, Poll, PollQuery, PollSort, PollStatus, PotentialPoll, Tokens,
    User, UserStats,
};

use crate::error::{
    AuthorizationError, EngineResult, NotFoundError, StateError, ValidationError,
};
use crate::payout::{self, Settlement};
use crate::session::{SessionProvider, UserDirectory};
use crate::store::{unstaked_option, Seed, Store};

/// Fee charged to the creator of a poll.
pub const POLL_CREATION_COST: Tokens = 5_000_000.0;

pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub creation_fee: Tokens,
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.creation_fee.is_finite() && self.creation_fee >= 0.0) {
            return Err(ValidationError::InvalidCreationFee(self.creation_fee).into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            creation_fee: POLL_CREATION_COST,
        }
    }
}

pub struct SettlementEngine<S = UserDirectory> {
    store: Store,
    session: S,
    clock: Box<dyn Clock>,
    config: EngineConfig,
}

impl SettlementEngine<UserDirectory> {
    pub fn from_seed(seed: Seed, config: EngineConfig, clock: impl Clock + 'static) -> EngineResult<Self> {
        config.validate()?;
        let mut user_ids = HashSet::new();
        let mut user_names = HashSet::new();
        for user in &seed.users {
            if !user_ids.insert(user.id.as_str()) {
                return Err(ValidationError::InvalidSeed(format!("duplicate user id {}", user.id)).into());
            }
            if !user_names.insert(user.name.as_str()) {
                return Err(ValidationError::InvalidSeed(format!("duplicate user name {}", user.name)).into());
            }
            if !(user.balance.is_finite() && user.balance >= 0.0) {
                return Err(ValidationError::InvalidSeed(format!(
                    "user {} has balance {}",
                    user.id, user.balance
                ))
                .into());
            }
        }
        let store = Store::from_seed(seed.polls, seed.bets, |id| user_ids.contains(id))?;
        let session = UserDirectory::new(seed.users);
        Ok(Self::new(store, session, config, clock))
    }

    pub fn login(&self, name: &str) -> EngineResult<User> {
        self.session.login(name)
    }

    pub fn register(&mut self, name: &str) -> EngineResult<User> {
        let now = self.clock.now();
        self.session.register(name, now)
    }

    pub fn update_wallet_address(&mut self, user_id: &str, address: &str) -> EngineResult<User> {
        self.session.update_wallet_address(user_id, address)
    }
}

impl<S: SessionProvider> SettlementEngine<S> {
    pub fn new(store: Store, session: S, config: EngineConfig, clock: impl Clock + 'static) -> Self {
        Self {
            store,
            session,
            clock: Box::new(clock),
            config,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.session.user(id)
    }

    fn acting_user(&self, actor: Option<&str>) -> EngineResult<&User> {
        let id = actor.ok_or(AuthorizationError::NotLoggedIn)?;
        self.session
            .user(id)
            .ok_or_else(|| AuthorizationError::NotLoggedIn.into())
    }

    fn acting_admin(&self, actor: Option<&str>, action: &'static str) -> EngineResult<&User> {
        let user = self.acting_user(actor)?;
        if !user.is_admin() {
            return Err(AuthorizationError::AdminOnly(action).into());
        }
        Ok(user)
    }

    pub fn create_poll(&mut self, draft: PotentialPoll, actor: Option<&str>) -> EngineResult<Poll> {
        let now = self.clock.now();
        let fee = self.config.creation_fee;

        let creator = self.acting_user(actor)?;
        if creator.balance < fee {
            return Err(AuthorizationError::InsufficientBalance {
                available: creator.balance,
                required: fee,
            }
            .into());
        }
        let creator_id = creator.id.clone();

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingTitle.into());
        }
        let description = draft.description.trim();
        if description.is_empty() {
            return Err(ValidationError::MissingDescription.into());
        }
        let end_time = draft.end_time.ok_or(ValidationError::MissingEndTime)?;
        if end_time <= now {
            return Err(ValidationError::EndTimeNotInFuture.into());
        }
        if draft.options.len() < 2 {
            return Err(ValidationError::TooFewOptions.into());
        }
        let texts: Vec<&str> = draft.options.iter().map(|text| text.trim()).collect();
        if texts.iter().any(|text| text.is_empty()) {
            return Err(ValidationError::EmptyOptionText.into());
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = texts.iter().find(|text| !seen.insert(**text)) {
            return Err(ValidationError::DuplicateOption(duplicate.to_string()).into());
        }

        self.session.debit(&creator_id, fee)?;

        let id = self.store.next_poll_id();
        let poll = Poll {
            options: texts
                .iter()
                .enumerate()
                .map(|(i, text)| unstaked_option(format!("{id}_{}", i + 1), *text))
                .collect(),
            id,
            title: title.to_string(),
            description: description.to_string(),
            category: draft.category.trim().to_string(),
            created_by: creator_id,
            start_time: now,
            end_time,
            status: PollStatus::Active,
            correct_option_id: None,
            total_bet_amount: 0.0,
            reward_distributed: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_poll(poll.clone());
        Ok(poll)
    }

    pub fn place_bet(
        &mut self,
        poll_id: &str,
        option_id: &str,
        amount: Tokens,
        actor: Option<&str>,
    ) -> EngineResult<Bet> {
        let now = self.clock.now();

        let bettor = self.acting_user(actor)?;
        if !(amount.is_finite() && amount > 0.0) {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if bettor.balance < amount {
            return Err(AuthorizationError::InsufficientBalance {
                available: bettor.balance,
                required: amount,
            }
            .into());
        }
        let bettor_id = bettor.id.clone();

        let poll = self.find_poll(poll_id)?;
        if !poll.is_active() {
            return Err(StateError::PollNotActive(poll_id.to_string()).into());
        }
        if now >= poll.end_time {
            return Err(StateError::BettingClosed(poll_id.to_string()).into());
        }
        find_option(poll, option_id)?;

        self.session.debit(&bettor_id, amount)?;

        let bet = Bet {
            id: self.store.next_bet_id(),
            user_id: bettor_id,
            poll_id: poll_id.to_string(),
            option_id: option_id.to_string(),
            amount,
            created_at: now,
            status: BetStatus::Active,
            payout: None,
            payout_processed: false,
        };

        if let Some(poll) = self.store.poll_mut(poll_id) {
            if let Some(option) = poll.options.iter_mut().find(|option| option.id == option_id) {
                option.bet_amount += amount;
                option.bettor_count += 1;
            }
            poll.total_bet_amount += amount;
            poll.updated_at = now;
        }
        self.store.insert_bet(bet.clone());
        Ok(bet)
    }

    /// Concludes `poll_id` with `correct_option_id` winning, pays every
    /// winning bet its pari-mutuel share and credits it to the bettor.
    ///
    /// If nobody staked on the winning option every bet is lost and nothing is
    /// paid out.
    pub fn resolve_poll(
        &mut self,
        poll_id: &str,
        correct_option_id: &str,
        actor: Option<&str>,
    ) -> EngineResult<Settlement> {
        let now = self.clock.now();
        self.acting_admin(actor, "resolve polls")?;

        let poll = self.find_poll(poll_id)?;
        match poll.status {
            PollStatus::Active => {}
            PollStatus::Completed => return Err(StateError::AlreadyResolved(poll_id.to_string()).into()),
            PollStatus::Canceled => return Err(StateError::PollNotActive(poll_id.to_string()).into()),
        }
        find_option(poll, correct_option_id)?;

        let settlement = payout::settle(poll, correct_option_id, self.store.bets_for_poll(poll_id));
        self.ensure_known_bettors(settlement.winners().map(|outcome| outcome.user_id.as_str()))?;

        for winner in settlement.winners() {
            self.session.credit(&winner.user_id, winner.payout)?;
        }
        for bet in self.store.bets_for_poll_mut(poll_id) {
            if let Some(outcome) = settlement.outcomes.iter().find(|outcome| outcome.bet_id == bet.id) {
                bet.status = outcome.status;
                bet.payout = Some(outcome.payout);
                bet.payout_processed = true;
            }
        }
        if let Some(poll) = self.store.poll_mut(poll_id) {
            poll.status = PollStatus::Completed;
            poll.correct_option_id = Some(correct_option_id.to_string());
            poll.reward_distributed = true;
            poll.updated_at = now;
        }
        Ok(settlement)
    }

    /// Calls off an active poll and refunds every stake placed on it.
    pub fn cancel_poll(&mut self, poll_id: &str, actor: Option<&str>) -> EngineResult<Tokens> {
        let now = self.clock.now();
        self.acting_admin(actor, "cancel polls")?;

        let poll = self.find_poll(poll_id)?;
        if !poll.is_active() {
            return Err(StateError::PollNotActive(poll_id.to_string()).into());
        }
        let refunds: Vec<(String, Tokens)> = self
            .store
            .bets_for_poll(poll_id)
            .map(|bet| (bet.user_id.clone(), bet.amount))
            .collect();
        self.ensure_known_bettors(refunds.iter().map(|(user_id, _)| user_id.as_str()))?;

        for (user_id, amount) in &refunds {
            self.session.credit(user_id, *amount)?;
        }
        for bet in self.store.bets_for_poll_mut(poll_id) {
            bet.status = BetStatus::Refunded;
            bet.payout = Some(bet.amount);
            bet.payout_processed = true;
        }
        if let Some(poll) = self.store.poll_mut(poll_id) {
            poll.status = PollStatus::Canceled;
            poll.reward_distributed = true;
            poll.updated_at = now;
        }
        Ok(refunds.iter().map(|(_, amount)| amount).sum())
    }

    fn ensure_known_bettors<'a>(&self, mut user_ids: impl Iterator<Item = &'a str>) -> EngineResult<()> {
        match user_ids.find(|id| self.session.user(id).is_none()) {
            Some(id) => Err(NotFoundError::User(id.to_string()).into()),
            None => Ok(()),
        }
    }

    fn find_poll(&self, poll_id: &str) -> EngineResult<&Poll> {
        self.store
            .poll(poll_id)
            .ok_or_else(|| NotFoundError::Poll(poll_id.to_string()).into())
    }

    pub fn get_poll(&self, poll_id: &str) -> Option<&Poll> {
        self.store.poll(poll_id)
    }

    pub fn get_user_bets(&self, user_id: &str) -> Vec<&Bet> {
        self.store.bets_by_user(user_id).collect()
    }

    pub fn polls(&self) -> &[Poll] {
        self.store.polls()
    }

    pub fn list_polls(&self, query: &PollQuery) -> Vec<&Poll> {
        let search = query.search.as_deref().map(str::to_lowercase);
        let mut polls: Vec<&Poll> = self
            .store
            .polls()
            .iter()
            .filter(|poll| match &search {
                Some(term) => {
                    poll.title.to_lowercase().contains(term)
                        || poll.description.to_lowercase().contains(term)
                }
                None => true,
            })
            .filter(|poll| query.category.as_ref().map_or(true, |category| &poll.category == category))
            .filter(|poll| query.status.map_or(true, |status| poll.status == status))
            .filter(|poll| query.created_by.as_ref().map_or(true, |creator| &poll.created_by == creator))
            .collect();

        match query.sort {
            PollSort::Newest => polls.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            PollSort::Oldest => polls.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            PollSort::MostStaked => {
                polls.sort_by(|a, b| b.total_bet_amount.total_cmp(&a.total_bet_amount))
            }
        }
        polls
    }

    pub fn trending_polls(&self, limit: usize) -> Vec<&Poll> {
        let mut polls = self.list_polls(&PollQuery {
            status: Some(PollStatus::Active),
            sort: PollSort::MostStaked,
            ..PollQuery::default()
        });
        polls.truncate(limit);
        polls
    }

    pub fn quote_return(&self, poll_id: &str, option_id: &str, amount: Tokens) -> EngineResult<Tokens> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        let poll = self.find_poll(poll_id)?;
        let option = find_option(poll, option_id)?;
        Ok(payout::potential_return(poll.total_bet_amount, option.bet_amount, amount))
    }

    pub fn platform_stats(&self) -> PlatformStats {
        let polls = self.store.polls();
        let count = |status: PollStatus| polls.iter().filter(|poll| poll.status == status).count();
        PlatformStats {
            active_polls: count(PollStatus::Active),
            completed_polls: count(PollStatus::Completed),
            canceled_polls: count(PollStatus::Canceled),
            total_bets: polls.iter().map(Poll::bettor_count).sum(),
            total_staked: polls.iter().map(|poll| poll.total_bet_amount).sum(),
        }
    }

    pub fn user_stats(&self, user_id: &str) -> UserStats {
        let mut stats = UserStats {
            polls_created: self
                .store
                .polls()
                .iter()
                .filter(|poll| poll.created_by == user_id)
                .count(),
            ..UserStats::default()
        };
        for bet in self.store.bets_by_user(user_id) {
            stats.total_bets += 1;
            match bet.status {
                BetStatus::Active => stats.active_bets += 1,
                BetStatus::Won => {
                    stats.won_bets += 1;
                    stats.total_winnings += bet.payout.unwrap_or(0.0);
                }
                BetStatus::Lost => {
                    stats.lost_bets += 1;
                    stats.total_lost += bet.amount;
                }
                BetStatus::Refunded => stats.refunded_bets += 1,
            }
        }
        stats
    }
}

fn find_option<'a>(poll: &'a Poll, option_id: &str) -> EngineResult<&'a common::PollOption> {
    poll.option(option_id).ok_or_else(|| {
        NotFoundError::Option {
            poll_id: poll.id.clone(),
            option_id: option_id.to_string(),
        }
        .into()
    })
}
