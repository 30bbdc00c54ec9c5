use rand::Rng;
use vpnsub_store::{StoreError, User};

use crate::deps::Deps;
use crate::errors::CoreError;
use crate::services::referral_service::ReferralService;

const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const REFERRAL_CODE_LEN: usize = 8;
const MAX_CODE_GENERATION_ATTEMPTS: u32 = 5;

pub struct UserService;

impl UserService {
    /// Registers `user_id` if unseen, generating a unique referral code for
    /// them. Idempotent: calling again for an already-registered id just
    /// returns the existing row. `referral_code`, when given, is applied
    /// through [`ReferralService::apply`] unconditionally — whether or not
    /// the user already existed — matching a `/start <code>` deep link
    /// arriving after the user is already registered. A failure there
    /// (self-referral, already-applied, bad code) is surfaced to the
    /// caller, but the user row itself is already committed by that point
    /// and is not rolled back. Returns whether a bonus was actually
    /// applied, so the caller can render a distinct message.
    pub async fn register(deps: &Deps, user_id: i64, username: &str, referral_code: Option<&str>) -> Result<(User, bool), CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::user_service("register: begin", e))?;
        let existing = uow.users().by_id(user_id).map_err(|e| CoreError::user_service("register: lookup", e))?;
        uow.commit().map_err(|e| CoreError::user_service("register: commit read", e))?;

        let user = match existing {
            Some(user) => user,
            None => Self::create_with_unique_code(deps, user_id, username)?,
        };

        let bonus_applied = if let Some(code) = referral_code {
            ReferralService::apply(deps, user_id, code).await?;
            true
        } else {
            false
        };

        Ok((user, bonus_applied))
    }

    pub fn find(deps: &Deps, user_id: i64) -> Result<Option<User>, CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::user_service("find: begin", e))?;
        let user = uow.users().by_id(user_id).map_err(|e| CoreError::user_service("find: lookup", e))?;
        uow.commit().map_err(|e| CoreError::user_service("find: commit", e))?;
        Ok(user)
    }

    fn create_with_unique_code(deps: &Deps, user_id: i64, username: &str) -> Result<User, CoreError> {
        for _ in 0..MAX_CODE_GENERATION_ATTEMPTS {
            let code = random_referral_code();
            let uow = deps.store.begin().map_err(|e| CoreError::user_service("create: begin", e))?;
            match uow.users().create(user_id, username, &code) {
                Ok(user) => {
                    uow.commit().map_err(|e| CoreError::user_service("create: commit", e))?;
                    return Ok(user);
                }
                Err(StoreError::UniqueViolation(column)) if column == "users.username" => {
                    return Err(CoreError::user_service("create: username taken", StoreError::UniqueViolation(column)));
                }
                Err(StoreError::UniqueViolation(_)) => {
                    // referral_code collision: drop this unit of work and retry with a new code.
                    continue;
                }
                Err(err) => return Err(CoreError::user_service("create: insert", err)),
            }
        }
        Err(CoreError::ReferralCodeGeneration)
    }
}

fn random_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| REFERRAL_CODE_ALPHABET[rng.gen_range(0..REFERRAL_CODE_ALPHABET.len())] as char)
        .collect()
}
