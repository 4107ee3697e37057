use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use common::{Bet, BetStatus, Poll, PollOption, PollStatus, User, UserRole};
use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, ValidationError};

/// Starting data for an engine: accounts, polls and the bets already placed on
/// them. Option and poll totals in a seed are ignored and recomputed from the
/// bets.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Seed {
    pub users: Vec<User>,
    pub polls: Vec<Poll>,
    pub bets: Vec<Bet>,
}

impl Seed {
    /// Reads a MessagePack encoded seed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(rmp_serde::from_read(reader)?)
    }

    /// The stock accounts and the Bitcoin poll the product ships with.
    pub fn demo(now: DateTime<Utc>) -> Self {
        let users = vec![
            User {
                id: "1".into(),
                name: "admin".into(),
                role: UserRole::Admin,
                balance: 1000.0,
                wallet_address: Some("xMfokpvpLTKNgbqCJqGXR9rX63uwT2ywzN".into()),
                created_at: now,
            },
            User {
                id: "2".into(),
                name: "user".into(),
                role: UserRole::User,
                balance: 500.0,
                wallet_address: Some("xMfokpvpLTKNgbqCJqGXR9rX63uwT2ywzN".into()),
                created_at: now,
            },
        ];

        let poll = Poll {
            id: "1".into(),
            title: "Will Bitcoin reach $100,000 by the end of 2025?".into(),
            description: "Place your bets on whether Bitcoin will reach this milestone price by December 31, 2025.".into(),
            category: "Cryptocurrency".into(),
            options: vec![unstaked_option("1a", "Yes"), unstaked_option("1b", "No")],
            created_by: "1".into(),
            start_time: now,
            end_time: now + Duration::days(30),
            status: PollStatus::Active,
            correct_option_id: None,
            total_bet_amount: 0.0,
            reward_distributed: false,
            created_at: now - Duration::days(5),
            updated_at: now,
        };

        // Yes: 12 bets totalling 500, No: 8 bets totalling 300
        let mut stakes = vec![("1a", 50.0)];
        stakes.extend(std::iter::repeat(("1a", 40.0)).take(10));
        stakes.push(("1a", 50.0));
        stakes.extend(std::iter::repeat(("1b", 37.5)).take(8));

        let bets = stakes
            .into_iter()
            .enumerate()
            .map(|(i, (option_id, amount))| Bet {
                id: format!("b{}", i + 1),
                user_id: if i % 2 == 0 { "2" } else { "1" }.into(),
                poll_id: "1".into(),
                option_id: option_id.into(),
                amount,
                created_at: now - Duration::days(2),
                status: BetStatus::Active,
                payout: None,
                payout_processed: false,
            })
            .collect();

        Self {
            users,
            polls: vec![poll],
            bets,
        }
    }
}

pub fn unstaked_option(id: impl Into<String>, text: impl Into<String>) -> PollOption {
    PollOption {
        id: id.into(),
        text: text.into(),
        bet_amount: 0.0,
        bettor_count: 0,
    }
}

/// Monotonic id source. Yields `poll_<n>` and `bet_<n>`.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    polls: u64,
    bets: u64,
}

impl IdGenerator {
    fn next(counter: &mut u64, prefix: &str, taken: impl Fn(&str) -> bool) -> String {
        loop {
            *counter += 1;
            let id = format!("{prefix}_{counter}");
            if !taken(&id) {
                return id;
            }
        }
    }
}

/// Canonical poll and bet records, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Store {
    polls: Vec<Poll>,
    bets: Vec<Bet>,
    ids: IdGenerator,
}

impl Store {
    /// Builds a store from seeded polls and bets, checking references against
    /// `known_user` and recomputing every stake total from the bets.
    pub fn from_seed(
        mut polls: Vec<Poll>,
        bets: Vec<Bet>,
        known_user: impl Fn(&str) -> bool,
    ) -> EngineResult<Self> {
        let mut poll_ids = HashSet::new();
        for poll in &mut polls {
            if !poll_ids.insert(poll.id.clone()) {
                return Err(invalid_seed(format!("duplicate poll id {}", poll.id)));
            }
            check_options(poll)?;
            check_resolution(poll)?;
            for option in &mut poll.options {
                option.bet_amount = 0.0;
                option.bettor_count = 0;
            }
            poll.total_bet_amount = 0.0;
        }

        let mut bet_ids = HashSet::new();
        for bet in &bets {
            if !bet_ids.insert(bet.id.clone()) {
                return Err(invalid_seed(format!("duplicate bet id {}", bet.id)));
            }
            if !known_user(&bet.user_id) {
                return Err(invalid_seed(format!("bet {} has unknown user {}", bet.id, bet.user_id)));
            }
            if !(bet.amount.is_finite() && bet.amount > 0.0) {
                return Err(invalid_seed(format!("bet {} has amount {}", bet.id, bet.amount)));
            }
            let poll = polls
                .iter_mut()
                .find(|poll| poll.id == bet.poll_id)
                .ok_or_else(|| invalid_seed(format!("bet {} has unknown poll {}", bet.id, bet.poll_id)))?;
            check_bet_status(poll, bet)?;
            let option = poll
                .options
                .iter_mut()
                .find(|option| option.id == bet.option_id)
                .ok_or_else(|| invalid_seed(format!("bet {} has unknown option {}", bet.id, bet.option_id)))?;
            option.bet_amount += bet.amount;
            option.bettor_count += 1;
            poll.total_bet_amount += bet.amount;
        }

        Ok(Self {
            polls,
            bets,
            ids: IdGenerator::default(),
        })
    }

    pub fn polls(&self) -> &[Poll] {
        &self.polls
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    pub fn poll(&self, id: &str) -> Option<&Poll> {
        self.polls.iter().find(|poll| poll.id == id)
    }

    pub fn poll_mut(&mut self, id: &str) -> Option<&mut Poll> {
        self.polls.iter_mut().find(|poll| poll.id == id)
    }

    pub fn bets_for_poll<'s, 'q>(&'s self, poll_id: &'q str) -> impl Iterator<Item = &'s Bet> + 'q
    where
        's: 'q,
    {
        self.bets.iter().filter(move |bet| bet.poll_id == poll_id)
    }

    pub fn bets_for_poll_mut<'a>(
        &'a mut self,
        poll_id: &'a str,
    ) -> impl Iterator<Item = &'a mut Bet> + 'a {
        self.bets.iter_mut().filter(move |bet| bet.poll_id == poll_id)
    }

    pub fn bets_by_user<'s, 'q>(&'s self, user_id: &'q str) -> impl Iterator<Item = &'s Bet> + 'q
    where
        's: 'q,
    {
        self.bets.iter().filter(move |bet| bet.user_id == user_id)
    }

    pub fn insert_poll(&mut self, poll: Poll) {
        self.polls.push(poll);
    }

    pub fn insert_bet(&mut self, bet: Bet) {
        self.bets.push(bet);
    }

    pub fn next_poll_id(&mut self) -> String {
        let polls = &self.polls;
        IdGenerator::next(&mut self.ids.polls, "poll", |id| {
            polls.iter().any(|poll| poll.id == id)
        })
    }

    pub fn next_bet_id(&mut self) -> String {
        let bets = &self.bets;
        IdGenerator::next(&mut self.ids.bets, "bet", |id| {
            bets.iter().any(|bet| bet.id == id)
        })
    }
}

fn check_options(poll: &Poll) -> EngineResult<()> {
    if poll.options.len() < 2 {
        return Err(invalid_seed(format!("poll {} has fewer than 2 options", poll.id)));
    }
    let mut ids = HashSet::new();
    let mut texts = HashSet::new();
    for option in &poll.options {
        if !ids.insert(option.id.as_str()) || !texts.insert(option.text.as_str()) {
            return Err(invalid_seed(format!(
                "poll {} repeats option {}",
                poll.id, option.id
            )));
        }
    }
    Ok(())
}

fn check_resolution(poll: &Poll) -> EngineResult<()> {
    match (poll.status, &poll.correct_option_id) {
        (PollStatus::Completed, None) => Err(invalid_seed(format!(
            "completed poll {} has no correct option",
            poll.id
        ))),
        (PollStatus::Completed, Some(correct)) if poll.option(correct).is_none() => Err(invalid_seed(
            format!("poll {} resolved to unknown option {}", poll.id, correct),
        )),
        (PollStatus::Active | PollStatus::Canceled, Some(correct)) => Err(invalid_seed(format!(
            "unresolved poll {} names correct option {}",
            poll.id, correct
        ))),
        _ => Ok(()),
    }
}

// A bet is settled exactly once, together with its poll.
fn check_bet_status(poll: &Poll, bet: &Bet) -> EngineResult<()> {
    let consistent = match poll.status {
        PollStatus::Active => bet.status == BetStatus::Active,
        PollStatus::Canceled => bet.status == BetStatus::Refunded,
        PollStatus::Completed => match bet.status {
            BetStatus::Won => poll.correct_option_id.as_deref() == Some(bet.option_id.as_str()),
            BetStatus::Lost => true,
            BetStatus::Active | BetStatus::Refunded => false,
        },
    };
    if consistent {
        Ok(())
    } else {
        Err(invalid_seed(format!(
            "bet {} is {:?} on {:?} poll {}",
            bet.id, bet.status, poll.status, poll.id
        )))
    }
}

fn invalid_seed(reason: String) -> crate::error::EngineError {
    ValidationError::InvalidSeed(reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_totals_come_from_bets() {
        let seed = Seed::demo(Utc::now());
        let store = Store::from_seed(seed.polls, seed.bets, |id| id == "1" || id == "2").unwrap();
        let poll = store.poll("1").unwrap();

        assert_eq!(poll.total_bet_amount, 800.0);
        assert_eq!(poll.option("1a").unwrap().bet_amount, 500.0);
        assert_eq!(poll.option("1a").unwrap().bettor_count, 12);
        assert_eq!(poll.option("1b").unwrap().bet_amount, 300.0);
        assert_eq!(poll.option("1b").unwrap().bettor_count, 8);
        assert_eq!(store.bets_for_poll("1").count(), 20);
    }

    #[test]
    fn stale_seed_totals_are_overwritten() {
        let mut seed = Seed::demo(Utc::now());
        seed.polls[0].options[0].bet_amount = 9999.0;
        seed.polls[0].total_bet_amount = 1.0;
        let store = Store::from_seed(seed.polls, seed.bets, |_| true).unwrap();
        assert_eq!(store.poll("1").unwrap().total_bet_amount, 800.0);
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut seed = Seed::demo(Utc::now());
        seed.bets[0].option_id = "1z".into();
        assert!(Store::from_seed(seed.polls, seed.bets, |_| true).is_err());

        let seed = Seed::demo(Utc::now());
        assert!(Store::from_seed(seed.polls, seed.bets, |id| id == "1").is_err());
    }

    fn rejects(seed: Seed) -> bool {
        matches!(
            Store::from_seed(seed.polls, seed.bets, |_| true),
            Err(crate::error::EngineError::Validation(ValidationError::InvalidSeed(_)))
        )
    }

    fn completed_demo() -> Seed {
        let mut seed = Seed::demo(Utc::now());
        seed.polls[0].status = PollStatus::Completed;
        seed.polls[0].correct_option_id = Some("1a".into());
        for bet in &mut seed.bets {
            bet.status = if bet.option_id == "1a" {
                BetStatus::Won
            } else {
                BetStatus::Lost
            };
        }
        seed
    }

    #[test]
    fn active_polls_only_carry_active_bets() {
        let mut seed = Seed::demo(Utc::now());
        seed.bets[0].status = BetStatus::Lost;
        assert!(rejects(seed));

        let mut seed = Seed::demo(Utc::now());
        seed.polls[0].correct_option_id = Some("1a".into());
        assert!(rejects(seed));
    }

    #[test]
    fn completed_polls_need_a_settled_outcome() {
        let seed = completed_demo();
        assert!(Store::from_seed(seed.polls, seed.bets, |_| true).is_ok());

        let mut seed = completed_demo();
        seed.polls[0].correct_option_id = None;
        assert!(rejects(seed));

        let mut seed = completed_demo();
        seed.polls[0].correct_option_id = Some("1z".into());
        assert!(rejects(seed));

        let mut seed = completed_demo();
        seed.bets[0].status = BetStatus::Active;
        assert!(rejects(seed));

        let mut seed = completed_demo();
        let losing = seed.bets.iter().position(|bet| bet.option_id == "1b").unwrap();
        seed.bets[losing].status = BetStatus::Won;
        assert!(rejects(seed));
    }

    #[test]
    fn canceled_polls_only_carry_refunds() {
        let mut seed = Seed::demo(Utc::now());
        seed.polls[0].status = PollStatus::Canceled;
        assert!(rejects(seed.clone()));

        for bet in &mut seed.bets {
            bet.status = BetStatus::Refunded;
        }
        assert!(Store::from_seed(seed.polls, seed.bets, |_| true).is_ok());
    }

    #[test]
    fn ids_skip_seeded_records() {
        let mut seed = Seed::demo(Utc::now());
        seed.polls[0].id = "poll_1".into();
        for bet in &mut seed.bets {
            bet.poll_id = "poll_1".into();
        }
        seed.bets[0].id = "bet_1".into();
        let mut store = Store::from_seed(seed.polls, seed.bets, |_| true).unwrap();

        assert_eq!(store.next_poll_id(), "poll_2");
        assert_eq!(store.next_poll_id(), "poll_3");
        assert_eq!(store.next_bet_id(), "bet_2");
    }

    #[test]
    fn seeds_load_from_msgpack() {
        let seed = Seed::demo(Utc::now());
        let path = std::env::temp_dir().join(format!("settlement-seed-{}.msgpack", std::process::id()));
        std::fs::write(&path, rmp_serde::to_vec(&seed).unwrap()).unwrap();
        let loaded = Seed::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, seed);
    }
}
