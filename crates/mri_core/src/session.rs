//! crates/mri_core/src/session.rs
//!
//! The per-interaction state machine that drives a user through
//! authenticate → classify → submit → report.
//!
//! Each transition takes explicit inputs and returns the next stage (or a value)
//! plus any error. A failed transition always leaves the session in a stage from
//! which the failed step can be retried.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec;
use crate::domain::{Prediction, ScanRecord};
use crate::error::{AuthError, FieldError, SessionError, ValidationErrors};
use crate::ports::{Classifier, CredentialHasher, RecordStore};
use crate::report::{self, ReportArtifact, ReportInput};
use crate::validation::{self, PatientForm};

//=========================================================================================
// Stages and Shared Services
//=========================================================================================

/// Where a session currently is in the diagnostic pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Anonymous,
    /// Credentials are being checked against the store.
    Authenticating,
    Authenticated,
    AwaitingUpload,
    Classified,
    FormPending,
    Submitted,
    ReportReady,
}

impl Stage {
    pub fn is_authenticated(self) -> bool {
        !matches!(self, Stage::Anonymous | Stage::Authenticating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Anonymous => "anonymous",
            Stage::Authenticating => "authenticating",
            Stage::Authenticated => "authenticated",
            Stage::AwaitingUpload => "awaiting_upload",
            Stage::Classified => "classified",
            Stage::FormPending => "form_pending",
            Stage::Submitted => "submitted",
            Stage::ReportReady => "report_ready",
        }
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub email: String,
    pub name: String,
}

/// Long-lived resources constructed once at startup and shared by every session.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RecordStore>,
    pub classifier: Arc<dyn Classifier>,
    pub hasher: Arc<dyn CredentialHasher>,
}

/// Holds a session in `Authenticating` while credentials are checked. Dropping
/// it without a commit, including when the request future is cancelled, puts
/// the session back to `Anonymous`.
struct AuthAttempt<'a> {
    stage: &'a mut Stage,
}

impl<'a> AuthAttempt<'a> {
    fn begin(stage: &'a mut Stage) -> Self {
        *stage = Stage::Authenticating;
        Self { stage }
    }

    fn commit(self, next: Stage) -> Stage {
        *self.stage = next;
        next
    }
}

impl Drop for AuthAttempt<'_> {
    fn drop(&mut self) {
        if *self.stage == Stage::Authenticating {
            *self.stage = Stage::Anonymous;
        }
    }
}

//=========================================================================================
// The Orchestrator
//=========================================================================================

pub struct SessionOrchestrator {
    services: Services,
    stage: Stage,
    identity: Option<Identity>,
    image_base64: Option<String>,
    prediction: Option<Prediction>,
    /// The record appended for the current scan. Doubles as the submitted flag.
    submission: Option<ScanRecord>,
    report: Option<ReportArtifact>,
}

impl SessionOrchestrator {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            stage: Stage::Anonymous,
            identity: None,
            image_base64: None,
            prediction: None,
            submission: None,
            report: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        self.prediction.as_ref()
    }

    pub fn submission(&self) -> Option<&ScanRecord> {
        self.submission.as_ref()
    }

    pub fn has_report(&self) -> bool {
        self.report.is_some()
    }

    // --- Authentication ---

    /// `Anonymous --login--> Authenticated`.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<Stage, SessionError> {
        self.require(self.stage == Stage::Anonymous, "log in")?;

        let email = email.trim();
        let mut missing = Vec::new();
        if email.is_empty() {
            missing.push(FieldError::new("email", "is required"));
        }
        if password.is_empty() {
            missing.push(FieldError::new("password", "is required"));
        }
        if !missing.is_empty() {
            return Err(ValidationErrors(missing).into());
        }

        let attempt = AuthAttempt::begin(&mut self.stage);
        match Self::authenticate(&self.services, email, password).await {
            Ok(identity) => {
                info!(email = %identity.email, "User logged in");
                self.identity = Some(identity);
                Ok(attempt.commit(Stage::Authenticated))
            }
            Err(e) => {
                warn!(email = %email, error = %e, "Login failed");
                Err(e)
            }
        }
    }

    async fn authenticate(
        services: &Services,
        email: &str,
        password: &str,
    ) -> Result<Identity, SessionError> {
        let credentials = services
            .store
            .find_user_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !services.hasher.verify(password, &credentials.password_hash)? {
            return Err(AuthError::InvalidCredentials.into());
        }

        Ok(Identity {
            email: credentials.email,
            name: credentials.name,
        })
    }

    /// `Anonymous --signup--> Authenticated`. Creates the account and signs in.
    pub async fn signup(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<Stage, SessionError> {
        self.require(self.stage == Stage::Anonymous, "sign up")?;

        let name = name.trim();
        let email = email.trim();
        validation::validate_signup(name, email, password, confirm)?;
        let password_hash = self.services.hasher.hash(password)?;

        let attempt = AuthAttempt::begin(&mut self.stage);
        match self
            .services
            .store
            .create_user(email, name, &password_hash)
            .await
        {
            Ok(()) => {
                info!(email = %email, "Account created");
                self.identity = Some(Identity {
                    email: email.to_string(),
                    name: name.to_string(),
                });
                Ok(attempt.commit(Stage::Authenticated))
            }
            Err(e) => {
                warn!(email = %email, error = %e, "Signup failed");
                Err(e.into())
            }
        }
    }

    /// Reachable from every stage. Clears all transient state; persisted records
    /// are untouched.
    pub fn sign_out(&mut self) -> Stage {
        if let Some(identity) = self.identity.take() {
            info!(email = %identity.email, "User signed out");
        }
        self.clear_scan();
        self.stage = Stage::Anonymous;
        self.stage
    }

    // --- Classification ---

    /// Moves to the upload step, discarding any previous scan.
    pub fn open_upload(&mut self) -> Result<Stage, SessionError> {
        self.require(self.stage.is_authenticated(), "upload a scan")?;
        self.clear_scan();
        self.stage = Stage::AwaitingUpload;
        Ok(self.stage)
    }

    /// `Authenticated --uploadImage--> Classified`.
    ///
    /// Allowed from any signed-in stage; a new upload replaces the previous scan.
    /// On failure the image is discarded and the session waits for another upload.
    pub async fn upload_image(&mut self, bytes: &[u8]) -> Result<Prediction, SessionError> {
        self.open_upload()?;

        let image = codec::load(bytes)?;
        let prediction = self.services.classifier.classify(&image).await?;
        let encoded = codec::encode(&image)?;

        info!(
            label = %prediction.label,
            confidence = prediction.confidence,
            "Scan classified"
        );
        self.image_base64 = Some(encoded);
        self.prediction = Some(prediction.clone());
        self.stage = Stage::Classified;
        Ok(prediction)
    }

    // --- Submission ---

    /// `Classified --openForm--> FormPending`.
    pub fn open_form(&mut self) -> Result<Stage, SessionError> {
        self.require(
            matches!(self.stage, Stage::Classified | Stage::FormPending),
            "open the application form",
        )?;
        self.stage = Stage::FormPending;
        Ok(self.stage)
    }

    /// `FormPending --submit--> Submitted`.
    ///
    /// Appends exactly one record per scan. Repeating the call after success
    /// returns the already-stored record without touching the store.
    pub async fn submit(&mut self, form: &PatientForm) -> Result<ScanRecord, SessionError> {
        if let (Stage::Submitted | Stage::ReportReady, Some(record)) =
            (self.stage, &self.submission)
        {
            debug!("Duplicate submission ignored");
            return Ok(record.clone());
        }
        self.require(self.stage == Stage::FormPending, "submit the form")?;

        let email = self
            .identity
            .as_ref()
            .map(|identity| identity.email.clone())
            .ok_or(AuthError::NotSignedIn)?;
        let patient = validation::validate_patient_form(form, self.image_base64.is_some())?;
        let prediction = self.prediction.as_ref().ok_or(SessionError::InvalidTransition {
            stage: self.stage,
            action: "submit the form",
        })?;

        let record = ScanRecord {
            user_email: email,
            patient,
            prediction: prediction.label,
            confidence: prediction.confidence,
            image_base64: self.image_base64.clone(),
            submitted_at: Utc::now(),
        };
        self.services.store.append_scan_record(&record).await?;

        info!(email = %record.user_email, label = %record.prediction, "Scan record saved");
        self.submission = Some(record.clone());
        self.stage = Stage::Submitted;
        Ok(record)
    }

    // --- Reporting ---

    /// `Submitted --generateReport--> ReportReady`. Regenerating from
    /// `ReportReady` replaces any report not yet taken.
    pub fn generate_report(&mut self) -> Result<Stage, SessionError> {
        self.require(
            matches!(self.stage, Stage::Submitted | Stage::ReportReady),
            "generate a report",
        )?;
        let record = self
            .submission
            .as_ref()
            .ok_or(SessionError::InvalidTransition {
                stage: self.stage,
                action: "generate a report",
            })?;

        let artifact = report::render(ReportInput {
            patient: &record.patient,
            label: record.prediction,
            confidence: record.confidence,
            image_base64: record.image_base64.as_deref(),
            generated_at: Utc::now(),
        })?;

        info!(filename = %artifact.filename, size = artifact.bytes.len(), "Report generated");
        self.report = Some(artifact);
        self.stage = Stage::ReportReady;
        Ok(self.stage)
    }

    /// Hands out the generated report once; later calls return `None` until a
    /// new report is generated.
    pub fn take_report(&mut self) -> Option<ReportArtifact> {
        self.report.take()
    }

    // --- History ---

    /// The signed-in user's records, newest first. No stage change.
    pub async fn history(&self) -> Result<Vec<ScanRecord>, SessionError> {
        let identity = self.identity.as_ref().ok_or(AuthError::NotSignedIn)?;
        Ok(self.services.store.list_scan_records(&identity.email).await?)
    }

    // --- Helpers ---

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), SessionError> {
        if allowed {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                stage: self.stage,
                action,
            })
        }
    }

    fn clear_scan(&mut self) {
        self.image_base64 = None;
        self.prediction = None;
        self.submission = None;
        self.report = None;
    }
}
