//! Time-of-day notification dispatchers.
//!
//! Two dispatchers share one shape: daily-quiz reminder and word-of-the-day.
//! Both run every cycle but act only for users whose local hour equals the
//! configured hour, and only once per user-local day. Email idempotency for
//! the daily reminder rides on `last_daily_reminder_sent`; everything else
//! rides on the sent_notifications ledger queried over the UTC image of the
//! user-local day.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::timezone;
use crate::domains::notifications::{NotificationChannel, NotificationStatus, NotificationType};
use crate::domains::users::{LearningPreferences, User};

use super::status::ActivityLevel;
use super::Worker;

#[derive(Default)]
pub(crate) struct NotifyOutcome {
    pub sent: u64,
    pub failed: u64,
    pub ios_sent: u64,
    pub ios_failed: u64,
    pub errors: Vec<String>,
}

pub(crate) async fn run_notification_stage(
    worker: &Worker,
    users: &[User],
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> NotifyOutcome {
    let mut outcome = NotifyOutcome::default();

    if !worker.email_settings.daily_reminder_enabled {
        return outcome;
    }
    let reminder_hour = worker.email_settings.daily_reminder_hour;

    for user in users {
        if cancel.is_cancelled() {
            break;
        }

        let tz = timezone::resolve(&user.timezone);
        if timezone::local_hour(now, tz) != reminder_hour {
            continue;
        }

        let prefs = match worker.deps.users.learning_preferences(user.id).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => continue,
            Err(e) => {
                warn!(user = %user.username, error = %e, "preferences lookup failed");
                continue;
            }
        };

        if prefs.daily_reminder_enabled {
            dispatch_daily_reminder(worker, user, &prefs, now, tz, &mut outcome).await;
        }
        if prefs.word_of_day_enabled {
            dispatch_word_of_day(worker, user, &prefs, now, tz, &mut outcome).await;
        }
    }

    info!(
        sent = outcome.sent,
        failed = outcome.failed,
        ios_sent = outcome.ios_sent,
        ios_failed = outcome.ios_failed,
        "notification stage complete"
    );
    outcome
}

async fn dispatch_daily_reminder(
    worker: &Worker,
    user: &User,
    prefs: &LearningPreferences,
    now: DateTime<Utc>,
    tz: chrono_tz::Tz,
    outcome: &mut NotifyOutcome,
) {
    let today_local = timezone::local_today(now, tz);

    // Once per local day, fenced by the last-sent timestamp.
    let already_sent = prefs
        .last_daily_reminder_sent
        .map(|sent| timezone::local_today(sent, tz) == today_local)
        .unwrap_or(false);

    if !already_sent {
        if let Some(email) = &user.email {
            let subject = "Your daily quiz is ready";
            let body = format!(
                "Ciao {}! Your {} questions for today are waiting. Keep the streak going.",
                user.username, user.preferred_language
            );
            match worker.deps.email.send(email, subject, &body).await {
                Ok(()) => {
                    outcome.sent += 1;
                    record_ledger(
                        worker,
                        user.id,
                        NotificationType::DailyReminder,
                        NotificationChannel::Email,
                        NotificationStatus::Sent,
                        None,
                    )
                    .await;
                    // Push failure alone must not re-trigger email tomorrow's
                    // pass; the fence advances on email success only.
                    if let Err(e) = worker
                        .deps
                        .users
                        .mark_daily_reminder_sent(user.id, now)
                        .await
                    {
                        warn!(user = %user.username, error = %e, "failed to update reminder fence");
                    }
                    worker.activity.record(
                        ActivityLevel::Info,
                        "Daily reminder email sent",
                        Some(user.id),
                        Some(&user.username),
                    );
                }
                Err(e) => {
                    outcome.failed += 1;
                    outcome
                        .errors
                        .push(format!("{}: reminder email failed: {}", user.username, e));
                    record_ledger(
                        worker,
                        user.id,
                        NotificationType::DailyReminder,
                        NotificationChannel::Email,
                        NotificationStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await;
                }
            }
        }
    } else {
        debug!(user = %user.username, "daily reminder already sent today");
    }

    if prefs.push_notifications_enabled {
        send_push_once_per_day(
            worker,
            user,
            NotificationType::DailyReminder,
            "Daily quiz reminder",
            "Your questions for today are ready.",
            serde_json::json!({ "deep_link": "quiz://daily" }),
            now,
            tz,
            outcome,
        )
        .await;
    }
}

async fn dispatch_word_of_day(
    worker: &Worker,
    user: &User,
    prefs: &LearningPreferences,
    now: DateTime<Utc>,
    tz: chrono_tz::Tz,
    outcome: &mut NotifyOutcome,
) {
    let today_local = timezone::local_today(now, tz);
    let window = timezone::local_day_window_utc(now, tz);

    let word = match worker
        .deps
        .questions
        .word_of_the_day(&user.preferred_language, today_local)
        .await
    {
        Ok(Some(word)) => word,
        Ok(None) => return,
        Err(e) => {
            warn!(user = %user.username, error = %e, "word of the day lookup failed");
            return;
        }
    };

    // Prefer the cached translation; a hit bumps the counter off-path.
    let translation = match worker
        .deps
        .translations
        .lookup(&word.word, &user.preferred_language, "english")
        .await
    {
        Ok(Some(entry)) => {
            let translations = worker.deps.translations.clone();
            let entry_id = entry.id;
            tokio::spawn(async move {
                if let Err(e) = translations.bump_hits(entry_id).await {
                    debug!(error = %e, "cache hit bump failed");
                }
            });
            Some(entry.translation)
        }
        Ok(None) => word.translation.clone(),
        Err(e) => {
            debug!(error = %e, "translation cache lookup failed");
            word.translation.clone()
        }
    };

    if let Some(email) = &user.email {
        let delivered = worker
            .deps
            .ledger
            .delivered_in_window(
                user.id,
                NotificationType::WordOfDay,
                NotificationChannel::Email,
                window,
            )
            .await
            .unwrap_or(true);

        if !delivered {
            let subject = format!("Word of the day: {}", word.word);
            let mut body = format!("Today's {} word is \"{}\".", user.preferred_language, word.word);
            if let Some(t) = &translation {
                body.push_str(&format!(" It means \"{}\".", t));
            }
            if let Some(example) = &word.example {
                body.push_str(&format!("\n\nExample: {}", example));
            }

            match worker.deps.email.send(email, &subject, &body).await {
                Ok(()) => {
                    outcome.sent += 1;
                    record_ledger(
                        worker,
                        user.id,
                        NotificationType::WordOfDay,
                        NotificationChannel::Email,
                        NotificationStatus::Sent,
                        None,
                    )
                    .await;
                }
                Err(e) => {
                    outcome.failed += 1;
                    outcome
                        .errors
                        .push(format!("{}: word of day email failed: {}", user.username, e));
                    record_ledger(
                        worker,
                        user.id,
                        NotificationType::WordOfDay,
                        NotificationChannel::Email,
                        NotificationStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await;
                }
            }
        }
    }

    if prefs.push_notifications_enabled {
        send_push_once_per_day(
            worker,
            user,
            NotificationType::WordOfDay,
            &format!("Word of the day: {}", word.word),
            translation.as_deref().unwrap_or("Open the app to learn it."),
            serde_json::json!({ "deep_link": "quiz://word-of-day" }),
            now,
            tz,
            outcome,
        )
        .await;
    }
}

/// Push delivery with ledger-backed once-per-local-day idempotency. Partial
/// success across a user's device tokens is recorded as `partial`.
#[allow(clippy::too_many_arguments)]
async fn send_push_once_per_day(
    worker: &Worker,
    user: &User,
    notification_type: NotificationType,
    title: &str,
    body: &str,
    data: serde_json::Value,
    now: DateTime<Utc>,
    tz: chrono_tz::Tz,
    outcome: &mut NotifyOutcome,
) {
    let window = timezone::local_day_window_utc(now, tz);
    let delivered = worker
        .deps
        .ledger
        .delivered_in_window(user.id, notification_type, NotificationChannel::Push, window)
        .await
        .unwrap_or(true);
    if delivered {
        return;
    }

    let tokens = match worker.deps.users.push_tokens(user.id).await {
        Ok(tokens) if !tokens.is_empty() => tokens,
        Ok(_) => return,
        Err(e) => {
            warn!(user = %user.username, error = %e, "push token lookup failed");
            return;
        }
    };

    let mut ok = 0u64;
    let mut failed = 0u64;
    let mut last_error = None;
    for token in &tokens {
        match worker
            .deps
            .push
            .send_notification(token, title, body, data.clone())
            .await
        {
            Ok(()) => ok += 1,
            Err(e) => {
                failed += 1;
                last_error = Some(e.to_string());
            }
        }
    }
    outcome.ios_sent += ok;
    outcome.ios_failed += failed;

    let status = match (ok, failed) {
        (0, _) => NotificationStatus::Failed,
        (_, 0) => NotificationStatus::Sent,
        _ => NotificationStatus::Partial,
    };
    record_ledger(
        worker,
        user.id,
        notification_type,
        NotificationChannel::Push,
        status,
        last_error.as_deref(),
    )
    .await;
}

async fn record_ledger(
    worker: &Worker,
    user_id: Uuid,
    notification_type: NotificationType,
    channel: NotificationChannel,
    status: NotificationStatus,
    error_message: Option<&str>,
) {
    if let Err(e) = worker
        .deps
        .ledger
        .record(user_id, notification_type, channel, status, error_message)
        .await
    {
        warn!(error = %e, "failed to record notification in ledger");
    }
}
