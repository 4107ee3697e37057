use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod network;

/// Token-denominated quantity. Stakes, balances and payouts all use it.
pub type Tokens = f64;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum UserRole {
    Admin,
    User,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    pub balance: Tokens,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PollStatus {
    Active,
    Completed,
    Canceled,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub options: Vec<PollOption>,
    pub created_by: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: PollStatus,
    pub correct_option_id: Option<String>,
    pub total_bet_amount: Tokens,
    pub reward_distributed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    /// Percentage of the pool staked on `option_id`, rounded to the nearest
    /// whole percent. An empty pool reports 0 for every option.
    pub fn option_share(&self, option_id: &str) -> Option<u32> {
        let option = self.option(option_id)?;
        if self.total_bet_amount <= 0.0 {
            return Some(0);
        }
        Some((option.bet_amount / self.total_bet_amount * 100.0).round() as u32)
    }

    /// Number of bets placed across all options.
    pub fn bettor_count(&self) -> u64 {
        self.options.iter().map(|option| option.bettor_count).sum()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub bet_amount: Tokens,
    // counts bets placed, not distinct users
    pub bettor_count: u64,
}

// A potential, unrealised poll. To be used for the creation of a new, fully realised poll
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PotentialPoll {
    pub title: String,
    pub description: String,
    pub category: String,
    pub end_time: Option<DateTime<Utc>>,
    pub options: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum BetStatus {
    Active,
    Won,
    Lost,
    Refunded,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    pub poll_id: String,
    pub option_id: String,
    pub amount: Tokens,
    pub created_at: DateTime<Utc>,
    pub status: BetStatus,
    pub payout: Option<Tokens>,
    pub payout_processed: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum PollSort {
    #[default]
    Newest,
    Oldest,
    MostStaked,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct PollQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<PollStatus>,
    pub created_by: Option<String>,
    pub sort: PollSort,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct PlatformStats {
    pub active_polls: usize,
    pub completed_polls: usize,
    pub canceled_polls: usize,
    pub total_bets: u64,
    pub total_staked: Tokens,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct UserStats {
    pub total_bets: usize,
    pub active_bets: usize,
    pub won_bets: usize,
    pub lost_bets: usize,
    pub refunded_bets: usize,
    pub total_winnings: Tokens,
    pub total_lost: Tokens,
    pub polls_created: usize,
}

/// Fixed token figures shown alongside deposits.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct TokenMetrics {
    pub token_price: f64,
    pub market_cap: f64,
    pub holders: u64,
    pub total_supply: u64,
    pub burned_tokens: u64,
}

impl TokenMetrics {
    pub fn reference() -> Self {
        Self {
            token_price: 0.0,
            market_cap: 0.0,
            holders: 250_000,
            total_supply: 15_000_000_000,
            burned_tokens: 1_500_000_000,
        }
    }

    pub fn circulating_supply(&self) -> u64 {
        self.total_supply.saturating_sub(self.burned_tokens)
    }
}

/// Category of a rejected operation, as seen by the other end of the wire.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    State,
}
