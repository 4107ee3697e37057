use chrono::{DateTime, Utc};
use common::{Tokens, User, UserRole};

use crate::error::{AuthorizationError, EngineResult, NotFoundError, ValidationError};

/// Balance every freshly registered account starts with.
pub const STARTING_BALANCE: Tokens = 100.0;

const WALLET_ADDRESS_LEN: usize = 34;

/// Where the engine reads acting users from and moves their balances.
///
/// Callers check the balance before debiting; `debit` still refuses to take a
/// balance negative.
pub trait SessionProvider {
    fn user(&self, id: &str) -> Option<&User>;

    fn debit(&mut self, id: &str, amount: Tokens) -> EngineResult<()>;

    fn credit(&mut self, id: &str, amount: Tokens) -> EngineResult<()>;
}

/// In-memory user accounts, in registration order.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Vec<User>,
    next_id: u64,
}

impl UserDirectory {
    pub fn new(users: Vec<User>) -> Self {
        let mut directory = Self { users, next_id: 0 };
        directory.next_id = directory.users.len() as u64;
        directory
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn by_name(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|user| user.name == name)
    }

    pub fn login(&self, name: &str) -> EngineResult<User> {
        self.by_name(name)
            .cloned()
            .ok_or_else(|| NotFoundError::User(name.to_string()).into())
    }

    pub fn register(&mut self, name: &str, now: DateTime<Utc>) -> EngineResult<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingUserName.into());
        }
        if self.by_name(name).is_some() {
            return Err(AuthorizationError::UserExists(name.to_string()).into());
        }

        let id = self.fresh_id();
        let user = User {
            id,
            name: name.to_string(),
            role: UserRole::User,
            balance: STARTING_BALANCE,
            wallet_address: None,
            created_at: now,
        };
        self.users.push(user.clone());
        Ok(user)
    }

    pub fn update_wallet_address(&mut self, id: &str, address: &str) -> EngineResult<User> {
        if !is_wallet_address(address) {
            return Err(ValidationError::InvalidWalletAddress.into());
        }
        let user = self.user_mut(id)?;
        user.wallet_address = Some(address.to_string());
        Ok(user.clone())
    }

    fn fresh_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let id = self.next_id.to_string();
            if self.user(&id).is_none() {
                return id;
            }
        }
    }

    fn user_mut(&mut self, id: &str) -> EngineResult<&mut User> {
        self.users
            .iter_mut()
            .find(|user| user.id == id)
            .ok_or_else(|| NotFoundError::User(id.to_string()).into())
    }
}

impl SessionProvider for UserDirectory {
    fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }

    fn debit(&mut self, id: &str, amount: Tokens) -> EngineResult<()> {
        let user = self.user_mut(id)?;
        if user.balance < amount {
            return Err(AuthorizationError::InsufficientBalance {
                available: user.balance,
                required: amount,
            }
            .into());
        }
        user.balance -= amount;
        Ok(())
    }

    fn credit(&mut self, id: &str, amount: Tokens) -> EngineResult<()> {
        self.user_mut(id)?.balance += amount;
        Ok(())
    }
}

/// 34 characters, a leading `x`, ASCII alphanumerics after it.
pub fn is_wallet_address(address: &str) -> bool {
    address.len() == WALLET_ADDRESS_LEN
        && address.starts_with('x')
        && address[1..].chars().all(|c| c.is_ascii_alphanumeric())
}
