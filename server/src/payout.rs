//! Pari-mutuel payout maths. Nothing here mutates state.

use common::{Bet, BetStatus, Poll, Tokens};

#[derive(Debug, Clone, PartialEq)]
pub struct BetOutcome {
    pub bet_id: String,
    pub user_id: String,
    pub status: BetStatus,
    pub payout: Tokens,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub poll_id: String,
    pub winning_option_id: String,
    /// Pool size `T` at resolution time.
    pub total_pool: Tokens,
    /// Stake `W` on the winning option at resolution time.
    pub winning_pool: Tokens,
    pub outcomes: Vec<BetOutcome>,
}

impl Settlement {
    pub fn total_paid(&self) -> Tokens {
        self.outcomes.iter().map(|outcome| outcome.payout).sum()
    }

    pub fn winners(&self) -> impl Iterator<Item = &BetOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == BetStatus::Won)
    }

    /// True when nobody backed the winning option, in which case every bet
    /// is lost and nothing is paid out.
    pub fn is_unbacked(&self) -> bool {
        !has_backing(self.winning_pool)
    }
}

fn has_backing(winning_pool: Tokens) -> bool {
    winning_pool.is_finite() && winning_pool > 0.0
}

/// Payout owed to a winning stake of `amount`.
///
/// Returns `None` when the winning option carries no stake, since there is no
/// share of the winning pool to scale by.
pub fn winning_payout(amount: Tokens, winning_pool: Tokens, total_pool: Tokens) -> Option<Tokens> {
    if !has_backing(winning_pool) {
        return None;
    }
    Some(amount + (amount / winning_pool) * (total_pool - winning_pool))
}

/// Computes the outcome of every bet in `bets` if `poll` resolves to
/// `winning_option_id`. Bets on other polls are ignored.
pub fn settle<'a>(
    poll: &Poll,
    winning_option_id: &str,
    bets: impl IntoIterator<Item = &'a Bet>,
) -> Settlement {
    let total_pool = poll.total_bet_amount;
    let winning_pool = poll
        .option(winning_option_id)
        .map(|option| option.bet_amount)
        .unwrap_or(0.0);

    let outcomes = bets
        .into_iter()
        .filter(|bet| bet.poll_id == poll.id)
        .map(|bet| {
            let won = if bet.option_id == winning_option_id {
                winning_payout(bet.amount, winning_pool, total_pool)
            } else {
                None
            };
            match won {
                Some(payout) => BetOutcome {
                    bet_id: bet.id.clone(),
                    user_id: bet.user_id.clone(),
                    status: BetStatus::Won,
                    payout,
                },
                None => BetOutcome {
                    bet_id: bet.id.clone(),
                    user_id: bet.user_id.clone(),
                    status: BetStatus::Lost,
                    payout: 0.0,
                },
            }
        })
        .collect();

    Settlement {
        poll_id: poll.id.clone(),
        winning_option_id: winning_option_id.to_string(),
        total_pool,
        winning_pool,
        outcomes,
    }
}

/// What a new bet of `amount` on an option holding `option_stake` would return
/// if that option won and nothing else changed.
pub fn potential_return(total_pool: Tokens, option_stake: Tokens, amount: Tokens) -> Tokens {
    if amount <= 0.0 {
        return 0.0;
    }
    (total_pool + amount) / (option_stake + amount) * amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{PollOption, PollStatus};

    const EPSILON: f64 = 1e-9;

    fn bet(id: &str, option_id: &str, amount: Tokens) -> Bet {
        Bet {
            id: id.into(),
            user_id: format!("user_{id}"),
            poll_id: "poll_1".into(),
            option_id: option_id.into(),
            amount,
            created_at: Utc::now(),
            status: BetStatus::Active,
            payout: None,
            payout_processed: false,
        }
    }

    fn poll_for(bets: &[Bet]) -> Poll {
        let now = Utc::now();
        let stake = |option_id: &str| -> Tokens {
            bets.iter()
                .filter(|bet| bet.option_id == option_id)
                .map(|bet| bet.amount)
                .sum()
        };
        let options = ["yes", "no", "maybe"]
            .iter()
            .map(|id| PollOption {
                id: id.to_string(),
                text: id.to_string(),
                bet_amount: stake(*id),
                bettor_count: bets.iter().filter(|bet| bet.option_id == *id).count() as u64,
            })
            .collect::<Vec<_>>();
        Poll {
            id: "poll_1".into(),
            title: "title".into(),
            description: "description".into(),
            category: "Cryptocurrency".into(),
            total_bet_amount: options.iter().map(|option| option.bet_amount).sum(),
            options,
            created_by: "1".into(),
            start_time: now,
            end_time: now,
            status: PollStatus::Active,
            correct_option_id: None,
            reward_distributed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn winners_split_the_whole_pool() {
        let bets = vec![
            bet("a", "yes", 500.0),
            bet("b", "yes", 200.0),
            bet("c", "no", 300.0),
            bet("d", "maybe", 17.5),
        ];
        let poll = poll_for(&bets);
        let settlement = settle(&poll, "yes", &bets);

        assert!((settlement.total_paid() - poll.total_bet_amount).abs() < EPSILON);
        let b = &settlement.outcomes[1];
        assert_eq!(b.status, BetStatus::Won);
        assert!((b.payout - (200.0 + 200.0 / 700.0 * 317.5)).abs() < EPSILON);
        for outcome in &settlement.outcomes[2..] {
            assert_eq!(outcome.status, BetStatus::Lost);
            assert_eq!(outcome.payout, 0.0);
        }
    }

    #[test]
    fn unbacked_winner_pays_nothing() {
        let bets = vec![bet("a", "yes", 500.0), bet("b", "no", 300.0)];
        let poll = poll_for(&bets);
        let settlement = settle(&poll, "maybe", &bets);

        assert!(settlement.is_unbacked());
        assert_eq!(settlement.winners().count(), 0);
        for outcome in &settlement.outcomes {
            assert_eq!(outcome.status, BetStatus::Lost);
            assert!(outcome.payout.is_finite());
            assert_eq!(outcome.payout, 0.0);
        }
    }

    #[test]
    fn sole_winning_option_returns_stakes() {
        let bets = vec![bet("a", "yes", 40.0), bet("b", "yes", 60.0)];
        let poll = poll_for(&bets);
        let settlement = settle(&poll, "yes", &bets);

        assert_eq!(settlement.outcomes[0].payout, 40.0);
        assert_eq!(settlement.outcomes[1].payout, 60.0);
    }

    #[test]
    fn bets_on_other_polls_are_skipped() {
        let mut stray = bet("z", "yes", 10.0);
        stray.poll_id = "poll_2".into();
        let bets = vec![bet("a", "yes", 10.0), stray];
        let poll = poll_for(&bets[..1]);
        let settlement = settle(&poll, "yes", &bets);
        assert_eq!(settlement.outcomes.len(), 1);
    }

    #[test]
    fn quote_includes_the_new_stake() {
        // 1000 pool after the bet, 700 on the option after the bet
        let quote = potential_return(800.0, 500.0, 200.0);
        assert!((quote - 1000.0 / 700.0 * 200.0).abs() < EPSILON);
        assert_eq!(potential_return(800.0, 500.0, 0.0), 0.0);
        assert_eq!(potential_return(0.0, 0.0, 50.0), 50.0);
    }
}
