//! Scheduled push job: checks every subscriber for new notices and delivers
//! them, isolating per-subscriber failures.
//!
//! Fan-out is deliberately serial: the FIB API handles concurrent connections
//! poorly, and reusing one connection across subscribers is faster in
//! aggregate. The scheduler never overlaps two runs, so each run is the
//! single writer of subscriber cursors.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{Timelike, Utc};
use futures::FutureExt;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::bot::{authorization_expired_reply, Messenger};
use crate::db::{self, Pool};
use crate::diff;
use crate::fibapi::{self, Notice, NoticeSource};
use crate::locales;
use crate::model::OutgoingMessage;
use crate::render::{self, RACO_BASE_URL};

const NOTICE_URL_TEMPLATE: &str = "https://raco.fib.upc.edu/avisos/veure.jsp?espai={espai}&id={id}";

/// Counters emitted at the end of each run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Subscribers whose notice list was fetched successfully.
    pub checked: u32,
    /// Subscribers in the store at the start of the run.
    pub total: u32,
    /// New notices found across all subscribers.
    pub fetched: u32,
    /// Notices actually delivered.
    pub sent: u32,
}

enum Outcome {
    Checked { fetched: u32, sent: u32 },
    Skipped,
}

/// The delivery fan-out job. Constructed once and driven by
/// [`run_scheduler`]; `run` can also be invoked directly (tests, manual
/// trigger).
pub struct PushJob<S, M> {
    pool: Pool,
    source: S,
    messenger: M,
    mailto_redirect_url: String,
}

impl<S: NoticeSource, M: Messenger> PushJob<S, M> {
    pub fn new(pool: Pool, source: S, messenger: M, mailto_redirect_url: String) -> Self {
        Self {
            pool,
            source,
            messenger,
            mailto_redirect_url,
        }
    }

    /// One full pass over all subscribers. Never fails as a whole: every
    /// per-subscriber error (or panic) is logged and the loop continues.
    #[instrument(skip_all)]
    pub async fn run(&self) -> RunStats {
        let start = Instant::now();
        let ids = match db::all_subscriber_ids(&self.pool).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(%err, "failed to list subscriber IDs");
                return RunStats::default();
            }
        };

        let mut stats = RunStats {
            total: ids.len() as u32,
            ..RunStats::default()
        };
        for id in ids {
            match AssertUnwindSafe(self.process_subscriber(id))
                .catch_unwind()
                .await
            {
                Ok(Ok(Outcome::Checked { fetched, sent })) => {
                    stats.checked += 1;
                    stats.fetched += fetched;
                    stats.sent += sent;
                }
                Ok(Ok(Outcome::Skipped)) => {}
                Ok(Err(err)) => {
                    error!(subscriber = id, %err, "failed to process subscriber");
                }
                Err(_) => {
                    error!(subscriber = id, "panic recovered while processing subscriber");
                }
            }
        }

        info!(
            checked = stats.checked,
            total = stats.total,
            sent = stats.sent,
            fetched = stats.fetched,
            elapsed = ?start.elapsed(),
            "push job run finished"
        );
        stats
    }

    async fn process_subscriber(&self, id: i64) -> Result<Outcome> {
        let Some(subscriber) = db::get_subscriber(&self.pool, id).await? else {
            return Ok(Outcome::Skipped);
        };

        if !subscriber.has_credentials() {
            // Corrupt or half-created record; ask for a re-login and drop it.
            warn!(subscriber = id, "subscriber has no usable credentials");
            let _ = self
                .messenger
                .send(id, &authorization_expired_reply(Some(&subscriber)))
                .await;
            db::delete_subscriber(&self.pool, id).await?;
            return Ok(Outcome::Skipped);
        }
        let locale = locales::get(&subscriber.language_code);

        let (notices, digest) = match self.source.fetch_notices(&subscriber).await {
            Ok(fetched) => fetched,
            Err(fibapi::Error::AuthorizationExpired) => {
                info!(subscriber = id, "FIB API authorization has expired");
                let notify = self
                    .messenger
                    .send(id, &authorization_expired_reply(Some(&subscriber)))
                    .await;
                // Only drop the subscriber once they have been told why;
                // otherwise retry the notification on the next cycle.
                if notify.is_ok() {
                    db::delete_subscriber(&self.pool, id).await?;
                }
                return Ok(Outcome::Skipped);
            }
            Err(err) => {
                // Transient failure: cursor untouched, retried next cycle.
                warn!(subscriber = id, %err, "failed to fetch notices");
                return Ok(Outcome::Skipped);
            }
        };

        if digest == subscriber.last_notices_digest {
            // Nothing changed upstream; no cursor write needed either.
            return Ok(Outcome::Checked { fetched: 0, sent: 0 });
        }

        let diff = diff::new_notices(&notices, subscriber.last_notice_timestamp);
        let fetched = diff.new_notices.len() as u32;
        let mut sent = 0u32;
        for notice in &diff.new_notices {
            let link_url = notice_link_url(&self.pool, &self.source, notice).await;
            let text = render::render(notice, locale, &link_url, &self.mailto_redirect_url);
            let silent = notice.is_banner() && subscriber.mute_banner_notices;
            match self
                .messenger
                .send(id, &OutgoingMessage::Notice { text, silent })
                .await
            {
                Ok(()) => {
                    info!(subscriber = id, notice = notice.id, "sent new notice");
                    sent += 1;
                }
                Err(err) => {
                    warn!(subscriber = id, notice = notice.id, %err, "failed to send notice");
                }
            }
        }

        // The cursor write is the last step: a crash before this point only
        // causes a redelivery on the next run.
        if let Err(err) = db::update_cursor(&self.pool, id, &digest, diff.max_timestamp).await {
            warn!(subscriber = id, %err, "failed to persist cursor; will redeliver next cycle");
        }

        Ok(Outcome::Checked { fetched, sent })
    }
}

/// The URL a notice message links to. Banner notices point at the general
/// notice board anchor; subject notices need the subject's UPC code, cached
/// in the store and resolved from the public API on a miss. Falls back to the
/// Racó front page when resolution fails.
pub async fn notice_link_url<S: NoticeSource>(pool: &Pool, source: &S, notice: &Notice) -> String {
    if notice.is_banner() {
        return format!("{RACO_BASE_URL}/#avis-{}", notice.id);
    }

    match db::subject_upc_code(pool, &notice.subject_code).await {
        Ok(Some(code)) => return subject_notice_url(code, notice.id),
        Ok(None) => {}
        Err(err) => warn!(subject = %notice.subject_code, %err, "subject code lookup failed"),
    }

    match source.public_subject(&notice.subject_code).await {
        Ok(subject) => {
            if let Err(err) = db::put_subject_upc_code(pool, &notice.subject_code, subject.upc_code).await
            {
                warn!(subject = %notice.subject_code, %err, "failed to cache subject UPC code");
            }
            subject_notice_url(subject.upc_code, notice.id)
        }
        Err(err) => {
            error!(subject = %notice.subject_code, %err, "failed to resolve subject UPC code");
            RACO_BASE_URL.to_string()
        }
    }
}

fn subject_notice_url(upc_code: i64, notice_id: i64) -> String {
    NOTICE_URL_TEMPLATE
        .replacen("{espai}", &upc_code.to_string(), 1)
        .replacen("{id}", &notice_id.to_string(), 1)
}

/// Drives the job on a fixed cadence. A tick that fires while the previous
/// run is still in progress is skipped, never queued, so runs cannot overlap.
/// A panic escaping a run is logged and the scheduler keeps going.
pub async fn run_scheduler<S, M>(job: Arc<PushJob<S, M>>, interval: Duration, skew_wait_secs: u32)
where
    S: NoticeSource,
    M: Messenger,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        wait_for_upstream_clock(skew_wait_secs).await;
        if AssertUnwindSafe(job.run()).catch_unwind().await.is_err() {
            error!("panic recovered in push job run");
        }
    }
}

/// Waits until the wall clock is at least `min_second` seconds into the
/// minute. The FIB API server's clock can lag ours; fetching at the very top
/// of the minute could miss a just-published notice while the cursor still
/// advances past it.
async fn wait_for_upstream_clock(min_second: u32) {
    let second = Utc::now().second();
    if second < min_second {
        tokio::time::sleep(Duration::from_secs(u64::from(min_second - second))).await;
    }
}
