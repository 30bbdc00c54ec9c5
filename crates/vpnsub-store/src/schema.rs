pub const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    referral_code TEXT NOT NULL UNIQUE,
    trial_used INTEGER NOT NULL DEFAULT 0,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tariffs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    duration_days INTEGER NOT NULL CHECK (duration_days >= 1),
    price TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
    tariff_id INTEGER NOT NULL REFERENCES tariffs(id),
    vpn_key TEXT NOT NULL DEFAULT '',
    vpn_key_id TEXT NOT NULL DEFAULT '',
    end_date TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    cnt_payments INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS referrals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    referrer_id INTEGER NOT NULL REFERENCES users(id),
    referred_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
    bonus_days INTEGER NOT NULL DEFAULT 7,
    created_at TEXT NOT NULL,
    UNIQUE(referrer_id, referred_id)
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    tariff_id INTEGER NOT NULL REFERENCES tariffs(id),
    amount TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    invoice_payload TEXT NOT NULL UNIQUE,
    external_charge_id TEXT UNIQUE,
    provider_charge_id TEXT UNIQUE,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS scheduler_jobs (
    job_id TEXT PRIMARY KEY,
    run_at TEXT NOT NULL,
    handler TEXT NOT NULL,
    args_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduler_jobs_run_at ON scheduler_jobs(run_at);
CREATE INDEX IF NOT EXISTS idx_subscriptions_end_date ON subscriptions(end_date);
"#;
