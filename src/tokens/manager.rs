//! Token manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::TokenConfig;
use crate::observability::metrics;
use crate::resilience::{calculate_backoff, with_deadline, UpstreamError};
use crate::tokens::types::{
    IssuedToken, Token, TokenError, TokenEvent, TokenIssuer, TokenRequest, TokenResult, TokenStats,
};

const EVENT_CAPACITY: usize = 256;

/// Shortest gap between issuing a token and refreshing it.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

struct Session {
    token: Token,
    request: TokenRequest,
    /// Changes whenever the token is replaced; stale timers compare against it.
    epoch: u64,
    refresh_at: Instant,
    refresh_task: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    /// Timer for the token of the given epoch.
    Scheduled(u64),
    Manual,
}

struct ManagerInner {
    config: TokenConfig,
    issuer: Arc<dyn TokenIssuer>,
    sessions: DashMap<String, Session>,
    /// Session id to the ticket of the refresh holding it.
    in_flight: Mutex<HashMap<String, u64>>,
    events: broadcast::Sender<TokenEvent>,
    next_id: AtomicU64,
}

impl ManagerInner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: TokenEvent) {
        let _ = self.events.send(event);
    }

    fn validity(&self, request: &TokenRequest) -> Duration {
        request.validity.unwrap_or_else(|| self.config.default_validity())
    }

    async fn issue(&self, request: &TokenRequest) -> Result<IssuedToken, UpstreamError> {
        let validity = self.validity(request);
        with_deadline(self.config.request_timeout(), self.issuer.issue(request, validity)).await
    }

    fn is_current(&self, session_id: &str, epoch: u64) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|session| session.epoch == epoch)
    }

    /// Build a session for a freshly issued token. The timer is started
    /// separately once the session is stored.
    fn new_session(&self, session_id: &str, request: TokenRequest, issued: IssuedToken) -> Session {
        let now = Instant::now();
        let validity = self.validity(&request);
        let expires_at = now + validity;
        // A margin at or above the validity would otherwise refresh
        // immediately after every issue.
        let earliest = now + (validity / 2).max(MIN_REFRESH_DELAY);
        let refresh_at = expires_at
            .checked_sub(self.config.refresh_margin())
            .map_or(earliest, |at| at.max(earliest));

        Session {
            token: Token {
                value: issued.value,
                join_link: issued.join_link,
                session_id: session_id.to_string(),
                created_at: now,
                expires_at,
            },
            request,
            epoch: self.next_id(),
            refresh_at,
            refresh_task: None,
        }
    }

    fn start_refresh_timer(self: &Arc<Self>, session_id: &str, epoch: u64, at: Instant) {
        let inner = self.clone();
        let id = session_id.to_string();
        let task = tokio::spawn(async move {
            time::sleep_until(at).await;
            let _ = inner.refresh(&id, Trigger::Scheduled(epoch)).await;
        });

        match self.sessions.get_mut(session_id) {
            Some(mut session) if session.epoch == epoch => session.refresh_task = Some(task),
            _ => task.abort(),
        }
    }

    /// Store a session unconditionally, cancelling whatever the previous
    /// token for that session had scheduled.
    fn store(self: &Arc<Self>, session_id: &str, session: Session) -> Token {
        let token = session.token.clone();
        let (epoch, refresh_at) = (session.epoch, session.refresh_at);

        if let Some(previous) = self.sessions.insert(session_id.to_string(), session) {
            if let Some(task) = previous.refresh_task {
                task.abort();
            }
            self.in_flight().remove(session_id);
            tracing::debug!(session_id, "Superseded previous token");
        }
        self.start_refresh_timer(session_id, epoch, refresh_at);
        token
    }

    /// Swap in a refreshed session if the token is still from `expected_epoch`.
    fn replace(self: &Arc<Self>, session_id: &str, expected_epoch: u64, session: Session, trigger: Trigger) -> Option<Token> {
        let token = session.token.clone();
        let (epoch, refresh_at) = (session.epoch, session.refresh_at);

        let previous = {
            let mut current = self.sessions.get_mut(session_id)?;
            if current.epoch != expected_epoch {
                return None;
            }
            std::mem::replace(&mut *current, session)
        };

        // A scheduled refresh is the previous timer itself and must not abort.
        if let (Trigger::Manual, Some(task)) = (trigger, previous.refresh_task) {
            task.abort();
        }
        self.start_refresh_timer(session_id, epoch, refresh_at);
        Some(token)
    }

    fn fail(&self, session_id: &str, error: TokenError) -> TokenError {
        metrics::record_token_refresh("failed");
        tracing::error!(session_id, error = %error, "Token refresh failed");
        self.emit(TokenEvent::RefreshFailed {
            session_id: session_id.to_string(),
            error: error.clone(),
        });
        error
    }

    /// Regenerate the token for `session_id` from its stored request.
    ///
    /// Returns `Ok(None)` when the refresh was a no-op: another refresh holds
    /// the session, or the token changed or was removed meanwhile.
    async fn refresh(self: &Arc<Self>, session_id: &str, trigger: Trigger) -> TokenResult<Option<Token>> {
        let (epoch, request) = match self.sessions.get(session_id) {
            Some(session) => (session.epoch, session.request.clone()),
            None => {
                return match trigger {
                    Trigger::Manual => Err(TokenError::UnknownSession(session_id.to_string())),
                    Trigger::Scheduled(_) => Ok(None),
                }
            }
        };
        if let Trigger::Scheduled(expected) = trigger {
            if expected != epoch {
                tracing::trace!(session_id, "Stale refresh timer, skipping");
                return Ok(None);
            }
        }

        let Some(_guard) = InFlightGuard::acquire(self, session_id) else {
            tracing::debug!(session_id, "Refresh already in flight");
            return Ok(None);
        };

        let max_attempts = self.config.max_refresh_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.is_current(session_id, epoch) {
                return Ok(None);
            }

            match self.issue(&request).await {
                Ok(issued) => {
                    let session = self.new_session(session_id, request, issued);
                    let Some(token) = self.replace(session_id, epoch, session, trigger) else {
                        tracing::debug!(session_id, "Session changed during refresh, discarding token");
                        return Ok(None);
                    };
                    metrics::record_token_refresh("success");
                    tracing::info!(session_id, attempts = attempt, "Token refreshed");
                    self.emit(TokenEvent::Refreshed {
                        session_id: session_id.to_string(),
                        attempts: attempt,
                    });
                    return Ok(Some(token));
                }
                Err(error) if error.is_auth() && !self.config.retry_on_auth_error => {
                    return Err(self.fail(
                        session_id,
                        TokenError::AuthRejected {
                            session_id: session_id.to_string(),
                            error,
                        },
                    ));
                }
                Err(error) if attempt >= max_attempts => {
                    return Err(self.fail(
                        session_id,
                        TokenError::RefreshExhausted {
                            session_id: session_id.to_string(),
                            attempts: attempt,
                            last_error: error,
                        },
                    ));
                }
                Err(error) => {
                    let delay = calculate_backoff(attempt, self.config.initial_backoff(), self.config.max_backoff());
                    metrics::record_token_refresh("retry");
                    tracing::warn!(
                        session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Token refresh attempt failed, backing off"
                    );
                    self.emit(TokenEvent::RefreshRetrying {
                        session_id: session_id.to_string(),
                        attempt,
                        delay,
                        error,
                    });
                    time::sleep(delay).await;
                }
            }
        }
    }
}

/// Holds the in-flight marker for one session while a refresh runs.
struct InFlightGuard {
    inner: Arc<ManagerInner>,
    session_id: String,
    ticket: u64,
}

impl InFlightGuard {
    fn acquire(inner: &Arc<ManagerInner>, session_id: &str) -> Option<Self> {
        let ticket = inner.next_id();
        {
            let mut in_flight = inner.in_flight();
            if in_flight.contains_key(session_id) {
                return None;
            }
            in_flight.insert(session_id.to_string(), ticket);
        }
        Some(Self {
            inner: inner.clone(),
            session_id: session_id.to_string(),
            ticket,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight();
        // The marker may have been cleared and retaken by a newer refresh.
        if in_flight.get(&self.session_id) == Some(&self.ticket) {
            in_flight.remove(&self.session_id);
        }
    }
}

/// Keeps one short-lived token per session and renews it ahead of expiry.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
}

impl TokenManager {
    pub fn new(config: &TokenConfig, issuer: Arc<dyn TokenIssuer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                config: config.clone(),
                issuer,
                sessions: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
                events,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Issue a token for `session_id` and schedule its refresh.
    ///
    /// Replaces any token the session already had; the old token's refresh
    /// timer is cancelled.
    pub async fn generate_token(&self, session_id: &str, request: TokenRequest) -> TokenResult<Token> {
        let issued = self.inner.issue(&request).await.map_err(|error| {
            tracing::warn!(session_id, error = %error, "Token generation failed");
            TokenError::Issuer(error)
        })?;

        let session = self.inner.new_session(session_id, request, issued);
        let refresh_at = session.refresh_at;
        let token = self.inner.store(session_id, session);

        tracing::info!(
            session_id,
            expires_in_ms = token.remaining().as_millis() as u64,
            refresh_in_ms = refresh_at.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Token generated"
        );
        self.inner.emit(TokenEvent::Generated {
            session_id: session_id.to_string(),
            expires_in: token.remaining(),
        });
        Ok(token)
    }

    /// Last-known token for the session, possibly expired.
    pub fn get_token(&self, session_id: &str) -> Option<Token> {
        self.inner.sessions.get(session_id).map(|session| session.token.clone())
    }

    /// Drop the session's token, its refresh timer and its in-flight marker.
    pub fn remove_token(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.inner.sessions.remove(session_id) else {
            return false;
        };
        if let Some(task) = session.refresh_task {
            task.abort();
        }
        self.inner.in_flight().remove(session_id);
        tracing::debug!(session_id, "Token removed");
        true
    }

    /// Refresh immediately instead of waiting for the timer.
    ///
    /// `Ok(None)` means another refresh is already running for the session.
    pub async fn refresh_now(&self, session_id: &str) -> TokenResult<Option<Token>> {
        self.inner.refresh(session_id, Trigger::Manual).await
    }

    /// When the session's next refresh is due.
    pub fn refresh_due(&self, session_id: &str) -> Option<Instant> {
        self.inner.sessions.get(session_id).map(|session| session.refresh_at)
    }

    pub fn get_stats(&self) -> TokenStats {
        let mut stats = TokenStats {
            sessions: 0,
            expired: 0,
            refreshes_in_flight: self.inner.in_flight().len(),
            scheduled: 0,
        };
        for session in self.inner.sessions.iter() {
            stats.sessions += 1;
            if session.token.is_expired() {
                stats.expired += 1;
            }
            if session.refresh_task.as_ref().is_some_and(|task| !task.is_finished()) {
                stats.scheduled += 1;
            }
        }
        stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel every refresh timer and forget all sessions.
    pub fn shutdown(&self) {
        let sessions: Vec<String> = self.inner.sessions.iter().map(|entry| entry.key().clone()).collect();
        for session_id in &sessions {
            self.remove_token(session_id);
        }
        tracing::info!(sessions = sessions.len(), "Token manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::collections::VecDeque;

    /// Issues numbered tokens, failing according to a script.
    struct ScriptedIssuer {
        outcomes: Mutex<VecDeque<Result<(), UpstreamError>>>,
        otherwise: Option<UpstreamError>,
        latency: Duration,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedIssuer {
        fn new(outcomes: Vec<Result<(), UpstreamError>>, otherwise: Option<UpstreamError>) -> Arc<Self> {
            Self::slow(outcomes, otherwise, Duration::ZERO)
        }

        fn slow(outcomes: Vec<Result<(), UpstreamError>>, otherwise: Option<UpstreamError>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                otherwise,
                latency,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl TokenIssuer for ScriptedIssuer {
        fn issue<'a>(&'a self, request: &'a TokenRequest, _validity: Duration) -> BoxFuture<'a, Result<IssuedToken, UpstreamError>> {
            Box::pin(async move {
                let n = {
                    let mut calls = self.calls.lock().unwrap();
                    calls.push(Instant::now());
                    calls.len()
                };
                if !self.latency.is_zero() {
                    time::sleep(self.latency).await;
                }
                let outcome = self.outcomes.lock().unwrap().pop_front();
                match outcome {
                    Some(Err(error)) => return Err(error),
                    Some(Ok(())) => {}
                    None => {
                        if let Some(error) = &self.otherwise {
                            return Err(error.clone());
                        }
                    }
                }
                Ok(IssuedToken {
                    value: format!("{}-{n}", request.credential),
                    join_link: format!("https://meet.example/join?token={}-{n}", request.credential),
                })
            })
        }
    }

    fn config() -> TokenConfig {
        TokenConfig {
            refresh_margin_ms: 5_000,
            max_refresh_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 150,
            ..Default::default()
        }
    }

    fn minute() -> TokenRequest {
        TokenRequest::new("key").with_validity(Duration::from_secs(60))
    }

    fn drain(rx: &mut broadcast::Receiver<TokenEvent>) -> Vec<TokenEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fires_margin_before_expiry() {
        let issuer = ScriptedIssuer::new(vec![], None);
        let manager = TokenManager::new(&config(), issuer.clone());
        let start = Instant::now();

        let token = manager.generate_token("s1", minute()).await.unwrap();
        assert_eq!(token.value, "key-1");
        assert_eq!(token.expires_at, start + Duration::from_secs(60));
        assert_eq!(manager.refresh_due("s1"), Some(start + Duration::from_secs(55)));

        time::sleep(Duration::from_millis(54_900)).await;
        assert_eq!(issuer.calls(), 1);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(issuer.call_times(), vec![start, start + Duration::from_secs(55)]);

        let refreshed = manager.get_token("s1").unwrap();
        assert_eq!(refreshed.value, "key-2");
        assert_eq!(manager.refresh_due("s1"), Some(start + Duration::from_secs(110)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_backs_off_and_gives_up() {
        let issuer = ScriptedIssuer::new(vec![Ok(())], Some(UpstreamError::Network("connection reset".into())));
        let manager = TokenManager::new(&config(), issuer.clone());
        let mut events = manager.subscribe();
        let start = Instant::now();

        let token = manager.generate_token("s1", minute()).await.unwrap();
        time::sleep(Duration::from_secs(60)).await;

        assert_eq!(
            issuer.call_times(),
            vec![
                start,
                start + Duration::from_secs(55),
                start + Duration::from_millis(55_100),
                start + Duration::from_millis(55_250),
            ]
        );

        let error = UpstreamError::Network("connection reset".into());
        let events = drain(&mut events);
        assert_eq!(
            &events[1..],
            &[
                TokenEvent::RefreshRetrying {
                    session_id: "s1".into(),
                    attempt: 1,
                    delay: Duration::from_millis(100),
                    error: error.clone(),
                },
                TokenEvent::RefreshRetrying {
                    session_id: "s1".into(),
                    attempt: 2,
                    delay: Duration::from_millis(150),
                    error: error.clone(),
                },
                TokenEvent::RefreshFailed {
                    session_id: "s1".into(),
                    error: TokenError::RefreshExhausted {
                        session_id: "s1".into(),
                        attempts: 3,
                        last_error: error,
                    },
                },
            ]
        );

        // Last-known token stays readable after the chain ends.
        assert_eq!(manager.get_token("s1"), Some(token));
        let stats = manager.get_stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.scheduled, 0);
        assert_eq!(stats.refreshes_in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_terminal() {
        let issuer = ScriptedIssuer::new(vec![Ok(())], Some(UpstreamError::Auth("key revoked".into())));
        let manager = TokenManager::new(&config(), issuer.clone());
        let mut events = manager.subscribe();

        manager.generate_token("s1", minute()).await.unwrap();
        time::sleep(Duration::from_secs(60)).await;

        assert_eq!(issuer.calls(), 2);
        let events = drain(&mut events);
        assert!(matches!(
            events.last(),
            Some(TokenEvent::RefreshFailed {
                error: TokenError::AuthRejected { .. },
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_retried_when_configured() {
        let issuer = ScriptedIssuer::new(vec![Ok(())], Some(UpstreamError::Auth("key revoked".into())));
        let config = TokenConfig {
            retry_on_auth_error: true,
            ..config()
        };
        let manager = TokenManager::new(&config, issuer.clone());

        manager.generate_token("s1", minute()).await.unwrap();
        time::sleep(Duration::from_secs(60)).await;

        assert_eq!(issuer.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regenerate_supersedes_schedule() {
        let issuer = ScriptedIssuer::new(vec![], None);
        let manager = TokenManager::new(&config(), issuer.clone());
        let start = Instant::now();

        manager.generate_token("s1", minute()).await.unwrap();
        time::sleep(Duration::from_secs(30)).await;
        manager.generate_token("s1", minute()).await.unwrap();
        assert_eq!(manager.refresh_due("s1"), Some(start + Duration::from_secs(85)));

        time::sleep(Duration::from_secs(26)).await;
        assert_eq!(issuer.calls(), 2, "old timer must not fire");

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(issuer.calls(), 3);
        assert_eq!(manager.get_stats().sessions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_cancels_refresh() {
        let issuer = ScriptedIssuer::new(vec![], None);
        let manager = TokenManager::new(&config(), issuer.clone());

        manager.generate_token("s1", minute()).await.unwrap();
        assert!(manager.remove_token("s1"));
        assert!(!manager.remove_token("s1"));
        assert!(manager.get_token("s1").is_none());

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_is_single_flight() {
        let issuer = ScriptedIssuer::slow(vec![], None, Duration::from_millis(50));
        let manager = TokenManager::new(&config(), issuer.clone());
        manager.generate_token("s1", minute()).await.unwrap();

        let (a, b) = tokio::join!(manager.refresh_now("s1"), manager.refresh_now("s1"));
        let refreshed = [a.unwrap(), b.unwrap()];

        assert_eq!(refreshed.iter().filter(|token| token.is_some()).count(), 1);
        assert_eq!(issuer.calls(), 2);
        assert_eq!(manager.get_token("s1").unwrap().value, "key-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_validity_refreshes_at_half_life() {
        let issuer = ScriptedIssuer::new(vec![], None);
        let manager = TokenManager::new(&config(), issuer.clone());
        let start = Instant::now();

        manager
            .generate_token("s1", TokenRequest::new("key").with_validity(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(manager.refresh_due("s1"), Some(start + Duration::from_secs(1)));

        // One refresh per second, not a tight loop against the issuer.
        time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(issuer.calls(), 11);
        assert!(!manager.get_token("s1").unwrap().is_expired());

        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_validity_still_waits_minimum_delay() {
        let issuer = ScriptedIssuer::new(vec![], None);
        let manager = TokenManager::new(&config(), issuer.clone());
        let start = Instant::now();

        manager
            .generate_token("s1", TokenRequest::new("key").with_validity(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(manager.refresh_due("s1"), Some(start + MIN_REFRESH_DELAY));

        time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(issuer.calls(), 3);

        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_unknown_session() {
        let manager = TokenManager::new(&config(), ScriptedIssuer::new(vec![], None));
        assert_eq!(
            manager.refresh_now("ghost").await,
            Err(TokenError::UnknownSession("ghost".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_bounded_by_deadline() {
        let issuer = ScriptedIssuer::slow(vec![], None, Duration::from_secs(20));
        let manager = TokenManager::new(&config(), issuer);

        let err = manager.generate_token("s1", minute()).await.unwrap_err();
        assert_eq!(err, TokenError::Issuer(UpstreamError::Timeout(Duration::from_secs(10))));
        assert!(manager.get_token("s1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timers() {
        let issuer = ScriptedIssuer::new(vec![], None);
        let manager = TokenManager::new(&config(), issuer.clone());
        manager.generate_token("s1", minute()).await.unwrap();
        manager.generate_token("s2", minute()).await.unwrap();
        assert_eq!(manager.get_stats().scheduled, 2);

        manager.shutdown();
        time::sleep(Duration::from_secs(120)).await;

        assert_eq!(issuer.calls(), 2);
        assert_eq!(manager.get_stats().sessions, 0);
    }
}
