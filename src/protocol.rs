//! Public protocol structs for the browser-facing WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::answers::Progress;
use crate::domain::{Credentials, GeneratedTest, Job, Question, SubmissionResult, User};
use crate::error::{PortalError, Result};
use crate::logic::{QuestionView, ResolvedResult};
use crate::report::AdofReport;
use crate::session::{ApplicationRecord, SessionContext};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Attach {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    AcquireTest,
    Question {
        index: usize,
    },
    Answer {
        index: usize,
        score: i64,
    },
    Submit,
    Result,
    ListJobs,
    SelectJob {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    SubmitApplication {
        #[serde(default)]
        name: String,
        #[serde(default)]
        email: String,
        #[serde(default)]
        phone: String,
        #[serde(default)]
        experience: String,
        #[serde(default)]
        education: String,
        #[serde(default)]
        skills: String,
        #[serde(rename = "cvBase64", default)]
        cv_base64: Option<String>,
        #[serde(rename = "fileName", default)]
        file_name: Option<String>,
        #[serde(rename = "contentType", default)]
        content_type: Option<String>,
    },
    Report,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Attached {
        user: User,
    },
    Test {
        test: TestOut,
    },
    Question {
        view: QuestionView,
    },
    Progress {
        progress: Progress,
    },
    Result {
        result: ResolvedResult,
    },
    LastResult {
        result: SubmissionResult,
    },
    Jobs {
        jobs: Vec<Job>,
    },
    JobSelected {
        job: Job,
    },
    Application {
        application: ApplicationRecord,
    },
    Report {
        report: AdofReport,
    },
    Error {
        code: String,
        message: String,
    },
}

impl From<PortalError> for ServerWsMessage {
    fn from(e: PortalError) -> Self {
        ServerWsMessage::Error { code: e.code().into(), message: e.to_string() }
    }
}

/// Test as delivered to the browser.
#[derive(Debug, Serialize)]
pub struct TestOut {
    #[serde(rename = "documentId")]
    pub document_id: Option<String>,
    pub message: Option<String>,
    pub total: usize,
    pub questions: Vec<Question>,
}

impl From<GeneratedTest> for TestOut {
    fn from(t: GeneratedTest) -> Self {
        TestOut {
            document_id: t.document_id.map(|id| id.to_string()),
            message: t.message,
            total: t.questions.len(),
            questions: t.questions,
        }
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct SignUpIn {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    pub password: String,
    pub role: String,
}

impl SignUpIn {
    pub fn into_credentials(self) -> Result<Credentials> {
        Ok(Credentials {
            name: self.name.filter(|n| !n.trim().is_empty()),
            email: self.email.trim().to_string(),
            password: self.password,
            role: self.role.parse()?,
        })
    }
}

#[derive(Serialize)]
pub struct SignUpOut {
    pub message: String,
}

#[derive(Serialize)]
pub struct SignInOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub user: User,
}

#[derive(Serialize)]
pub struct SessionOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub user: User,
    pub started_at: DateTime<Utc>,
    pub progress: Option<Progress>,
    pub has_result: bool,
    pub job: Option<Job>,
    pub application_submitted: bool,
}

impl From<SessionContext> for SessionOut {
    fn from(c: SessionContext) -> Self {
        SessionOut {
            session_id: c.id.to_string(),
            progress: c.test.as_ref().map(|t| t.sheet.progress()),
            has_result: c.last_result.is_some(),
            application_submitted: c.adof.application.is_some(),
            job: c.adof.job,
            started_at: c.started_at,
            user: c.user,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuestionQuery {
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub index: usize,
    pub score: i64,
}

#[derive(Debug, Deserialize)]
pub struct SelectJobIn {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Serialize)]
pub struct OkOut {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub sessions: usize,
}
