//! Re-authenticating session over the Tidepool client.

use glucolink_core::Reading;

use crate::client::{Credential, TidepoolClient, UpstreamError};

/// An established session against the upstream API.
///
/// The subject whose readings are fetched is resolved once at connect
/// time and kept for the process lifetime. A fresh login happens before
/// every fetch instead of tracking token expiry; at a one-minute poll
/// cadence the extra request is cheaper than expiry bookkeeping.
pub struct UpstreamSession {
    client: TidepoolClient,
    credential: Credential,
    subject_id: String,
}

impl UpstreamSession {
    /// Authenticate and resolve the subject to read from.
    ///
    /// The subject is the first account listed by the metadata call.
    ///
    /// # Errors
    ///
    /// Returns an error when login fails, the linked-user listing fails,
    /// or the account has no linked users.
    pub async fn connect(
        client: TidepoolClient,
        credential: Credential,
    ) -> Result<Self, UpstreamError> {
        let auth = client.login(&credential).await?;
        let users = client.linked_users(&auth.token, &auth.user_id).await?;

        let Some(subject_id) = users.into_iter().next() else {
            return Err(UpstreamError::NoSubject);
        };

        tracing::info!(subject_id = %subject_id, "Upstream session established");

        Ok(Self {
            client,
            credential,
            subject_id,
        })
    }

    /// The subject whose readings are fetched.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Fetch the latest glucose reading, failing soft.
    ///
    /// Any upstream failure is logged and collapses to `None` so the
    /// poll loop keeps running; the next scheduled poll is the retry.
    pub async fn latest_bg(&self) -> Option<Reading> {
        match self.try_latest().await {
            Ok(reading) => Some(reading),
            Err(err) => {
                tracing::warn!(error = %err, "Couldn't fetch reading");
                None
            }
        }
    }

    /// One fetch attempt: log in, read, and retry the read exactly once
    /// if the freshly issued token is rejected.
    async fn try_latest(&self) -> Result<Reading, UpstreamError> {
        let auth = self.client.login(&self.credential).await?;

        match self.client.latest_cbg(&auth.token, &self.subject_id).await {
            Err(UpstreamError::Auth { status }) => {
                tracing::debug!(status, "Fresh token rejected, logging in again");
                let auth = self.client.login(&self.credential).await?;
                self.client.latest_cbg(&auth.token, &self.subject_id).await
            }
            result => result,
        }
    }
}
