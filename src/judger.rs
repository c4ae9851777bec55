//! Judge orchestrator
//!
//! Runs a submission against a problem's ordered test cases. Every case is
//! one execution request dispatched through the host pool; a host that does
//! not answer is taken offline and the case is retried on another host.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dispatch::ExecutionClient;
use crate::error::PoolError;
use crate::pool::HostPool;
use crate::protocol::{
    CaseResult, ExecuteRequest, ExecuteResponse, JudgeResponse, Report, Summary, TestCase,
};
use crate::storage::{Problem, ProblemStore, SubmissionRecord, SubmissionStore};

/// Reason reported when every host has been exhausted
pub const NO_HOST_REASON: &str = "No available execution host";
/// Reason reported for an unknown problem number
pub const NO_PROBLEM_REASON: &str = "problem not found";

/// A submission to judge
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub problem_id: String,
    /// Authenticated submitter; anonymous submissions are not persisted
    pub user_id: Option<String>,
    pub code: String,
    /// Raw input, used only when the problem has no usable test cases
    pub input: String,
    pub language: Option<String>,
}

/// How judging a submission ended
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeOutcome {
    /// Every case ran to a clean exit
    Completed(Report),
    /// A case came back with a non-success status; later cases never ran
    ShortCircuited(ExecuteResponse),
    /// No host could serve a case
    NoHost,
}

impl JudgeOutcome {
    pub fn into_response(self) -> JudgeResponse {
        match self {
            JudgeOutcome::Completed(report) => JudgeResponse::completed(report),
            JudgeOutcome::ShortCircuited(resp) => JudgeResponse::from_execution(resp),
            JudgeOutcome::NoHost => JudgeResponse::system_error(NO_HOST_REASON),
        }
    }
}

pub struct Judger {
    pool: Arc<HostPool>,
    client: Arc<dyn ExecutionClient>,
    problems: Arc<dyn ProblemStore>,
    submissions: Arc<dyn SubmissionStore>,
}

impl Judger {
    pub fn new(
        pool: Arc<HostPool>,
        client: Arc<dyn ExecutionClient>,
        problems: Arc<dyn ProblemStore>,
        submissions: Arc<dyn SubmissionStore>,
    ) -> Self {
        Self {
            pool,
            client,
            problems,
            submissions,
        }
    }

    pub fn pool(&self) -> &Arc<HostPool> {
        &self.pool
    }

    /// Look up the problem, judge the submission and persist the record
    pub async fn judge(&self, submission: &Submission) -> JudgeResponse {
        let problem = match self.problems.get(&submission.problem_id).await {
            Ok(Some(problem)) => problem,
            Ok(None) => {
                info!("Problem {} not found", submission.problem_id);
                return JudgeResponse::system_error(NO_PROBLEM_REASON);
            }
            Err(e) => {
                error!("Failed to load problem {}: {}", submission.problem_id, e);
                return JudgeResponse::system_error(NO_PROBLEM_REASON);
            }
        };

        let outcome = self.judge_problem(&problem, submission).await;
        self.persist(submission, &outcome).await;
        outcome.into_response()
    }

    /// Run every test case of `problem` in order
    pub async fn judge_problem(&self, problem: &Problem, submission: &Submission) -> JudgeOutcome {
        let cases = problem.test_cases().unwrap_or_else(|| {
            debug!(
                "Problem {} has no usable test cases; running the raw input once",
                problem.number
            );
            vec![TestCase {
                input: submission.input.clone(),
                expect: String::new(),
            }]
        });

        info!(
            "Judging problem {} with {} test cases",
            problem.number,
            cases.len()
        );

        let mut results = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            let req = ExecuteRequest {
                code: submission.code.clone(),
                input: case.input.clone(),
                cpu_limit: problem.cpu_limit,
                mem_limit: problem.mem_limit,
                language: submission.language.clone(),
            };

            let resp = match self.dispatch(&req).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!("Case {} of problem {}: {}", i + 1, problem.number, e);
                    return JudgeOutcome::NoHost;
                }
            };

            if !resp.status().is_success() {
                info!(
                    "Case {} of problem {} stopped judging with status {}",
                    i + 1,
                    problem.number,
                    resp.status
                );
                return JudgeOutcome::ShortCircuited(resp);
            }

            let output = resp.stdout.as_deref().unwrap_or("").trim_end().to_string();
            let expected = case.expect.trim_end().to_string();
            results.push(CaseResult {
                name: format!("Case {}", i + 1),
                pass: output == expected,
                input: case.input.clone(),
                output,
                expected,
            });
        }

        let passed = results.iter().filter(|c| c.pass).count();
        let summary = Summary::new(results.len(), passed);
        info!("Problem {}: {}", problem.number, summary.overall);
        JudgeOutcome::Completed(Report {
            cases: results,
            summary,
        })
    }

    /// Send one request to the least-loaded host, offlining hosts that fail
    /// to answer. Tries at most as many hosts as the pool holds.
    pub async fn dispatch(&self, req: &ExecuteRequest) -> Result<ExecuteResponse, PoolError> {
        for _ in 0..self.pool.len() {
            let host = self.pool.choose()?;
            let result = {
                let _guard = host.acquire();
                self.client.execute(&host, req).await
            };
            match result {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!("{}", e);
                    self.pool.offline(host.id());
                }
            }
        }
        Err(PoolError::Unavailable)
    }

    async fn persist(&self, submission: &Submission, outcome: &JudgeOutcome) {
        let Some(user_id) = submission.user_id.clone() else {
            return;
        };
        let (status, passed, total) = match outcome {
            JudgeOutcome::Completed(report) => {
                (0, report.summary.passed, report.summary.total)
            }
            JudgeOutcome::ShortCircuited(resp) => (resp.status, 0, 0),
            JudgeOutcome::NoHost => return,
        };
        let record = SubmissionRecord {
            id: None,
            user_id,
            problem_id: submission.problem_id.clone(),
            status,
            passed,
            total,
            code: submission.code.clone(),
            language: submission
                .language
                .clone()
                .unwrap_or_else(|| crate::languages::Language::default().to_string()),
        };
        match self.submissions.record(record).await {
            Ok(id) => debug!("Recorded submission {}", id),
            Err(e) => warn!("Failed to record submission: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Category, Status};
    use crate::error::DispatchError;
    use crate::protocol::JudgeOutput;
    use crate::pool::Host;
    use crate::storage::MemorySubmissionStore;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Fake execution hosts: hosts listed in `down` refuse to answer, the
    /// rest run `program` on the request input
    struct FakeClient {
        down: HashSet<usize>,
        program: fn(&ExecuteRequest) -> ExecuteResponse,
        calls: Mutex<Vec<usize>>,
    }

    impl FakeClient {
        fn new(down: &[usize], program: fn(&ExecuteRequest) -> ExecuteResponse) -> Self {
            Self {
                down: down.iter().copied().collect(),
                program,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionClient for FakeClient {
        async fn execute(
            &self,
            host: &Host,
            req: &ExecuteRequest,
        ) -> Result<ExecuteResponse, DispatchError> {
            self.calls.lock().unwrap().push(host.id());
            assert_eq!(host.load(), 1);
            if self.down.contains(&host.id()) {
                return Err(DispatchError::Status {
                    host: host.to_string(),
                    status: 502,
                });
            }
            Ok((self.program)(req))
        }
    }

    struct Problems(HashMap<String, Problem>);

    #[async_trait]
    impl ProblemStore for Problems {
        async fn get(&self, number: &str) -> Result<Option<Problem>, crate::error::StoreError> {
            Ok(self.0.get(number).cloned())
        }
    }

    fn ok(stdout: &str) -> ExecuteResponse {
        ExecuteResponse {
            stdout: Some(stdout.to_string()),
            stderr: Some(String::new()),
            ..ExecuteResponse::from_status(Status::Success)
        }
    }

    fn adder(req: &ExecuteRequest) -> ExecuteResponse {
        let sum: i64 = req
            .input
            .split_whitespace()
            .filter_map(|n| n.parse::<i64>().ok())
            .sum();
        ok(&format!("{}\n", sum))
    }

    fn zero(_: &ExecuteRequest) -> ExecuteResponse {
        ok("0\n")
    }

    fn compile_error(_: &ExecuteRequest) -> ExecuteResponse {
        ExecuteResponse {
            reason: "main.cpp:1:1: error".to_string(),
            ..ExecuteResponse::from_status(Status::CompileError)
        }
    }

    fn exits_nonzero(_: &ExecuteRequest) -> ExecuteResponse {
        ExecuteResponse {
            stdout: Some("partial\n".to_string()),
            stderr: Some("exit 3".to_string()),
            ..ExecuteResponse::from_status(Status::NonZeroExit)
        }
    }

    fn echo(req: &ExecuteRequest) -> ExecuteResponse {
        ok(&req.input)
    }

    fn add_problem() -> Problem {
        Problem {
            number: "1".to_string(),
            title: "A+B".to_string(),
            cpu_limit: 1,
            mem_limit: 65536,
            tests: Some(
                r#"[{"input":"1 2","expect":"3"},{"input":"5 5","expect":"10"}]"#.to_string(),
            ),
        }
    }

    fn judger(
        hosts: usize,
        client: Arc<FakeClient>,
    ) -> (Judger, Arc<MemorySubmissionStore>) {
        let pool = HostPool::new(
            (0..hosts)
                .map(|i| ("127.0.0.1".to_string(), 9000 + i as u16))
                .collect(),
        )
        .unwrap();
        let problems = Problems(HashMap::from([("1".to_string(), add_problem())]));
        let submissions = Arc::new(MemorySubmissionStore::new());
        let judger = Judger::new(
            Arc::new(pool),
            client,
            Arc::new(problems),
            submissions.clone(),
        );
        (judger, submissions)
    }

    fn submission(user: Option<&str>) -> Submission {
        Submission {
            problem_id: "1".to_string(),
            user_id: user.map(str::to_string),
            code: "int main() {}".to_string(),
            input: String::new(),
            language: None,
        }
    }

    #[tokio::test]
    async fn test_all_cases_pass() {
        let client = Arc::new(FakeClient::new(&[], adder));
        let (judger, store) = judger(2, client);
        let resp = judger.judge(&submission(Some("alice"))).await;

        assert_eq!(resp.status, 0);
        assert_eq!(resp.reason, "All Passed");
        let report = resp.report().unwrap();
        assert_eq!(report.summary, Summary::new(2, 2));
        assert_eq!(report.cases[0].name, "Case 1");
        assert_eq!(report.cases[1].output, "10");
        assert_eq!(report.cases[1].expected, "10");

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].accepted());
        assert_eq!(records[0].language, "C++");
    }

    #[tokio::test]
    async fn test_wrong_answers_are_counted() {
        let client = Arc::new(FakeClient::new(&[], zero));
        let (judger, _) = judger(1, client);
        let resp = judger.judge(&submission(None)).await;

        assert_eq!(resp.status, 0);
        assert_eq!(resp.reason, "0/2 Passed");
        let report = resp.report().unwrap();
        assert!(report.cases.iter().all(|c| !c.pass));
        assert_eq!(report.cases[0].output, "0");
        assert_eq!(report.cases[0].input, "1 2");
    }

    #[tokio::test]
    async fn test_compile_error_short_circuits() {
        let client = Arc::new(FakeClient::new(&[], compile_error));
        let (judger, store) = judger(2, client.clone());
        let resp = judger.judge(&submission(Some("bob"))).await;

        assert_eq!(resp.status, -3);
        assert_eq!(resp.reason, "main.cpp:1:1: error");
        assert_eq!(resp.category, Some(Category::CompileError));
        assert!(resp.report().is_none());
        assert_eq!(client.calls().len(), 1);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, -3);
        assert!(!records[0].accepted());
    }

    #[tokio::test]
    async fn test_nonzero_exit_short_circuits() {
        let client = Arc::new(FakeClient::new(&[], exits_nonzero));
        let (judger, store) = judger(1, client.clone());
        let resp = judger.judge(&submission(Some("bob"))).await;

        assert_eq!(client.calls().len(), 1);
        assert_eq!(resp.status, -4);
        assert_eq!(resp.category, Some(Category::WrongAnswer));
        assert_eq!(resp.stdout, Some(JudgeOutput::Raw("partial\n".to_string())));
        assert_eq!(resp.stderr, "exit 3");
        assert!(resp.report().is_none());

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, -4);
        assert_eq!((records[0].passed, records[0].total), (0, 0));
    }

    #[tokio::test]
    async fn test_dead_host_is_offlined_and_retried() {
        let client = Arc::new(FakeClient::new(&[0], adder));
        let (judger, _) = judger(2, client.clone());
        let resp = judger.judge(&submission(None)).await;

        assert_eq!(resp.reason, "All Passed");
        assert_eq!(client.calls(), vec![0, 1, 1]);
        assert_eq!(judger.pool().offline_ids(), vec![0]);
        assert!(judger.pool().snapshot().hosts.iter().all(|h| h.load == 0));
    }

    #[tokio::test]
    async fn test_all_hosts_down_is_system_error() {
        let client = Arc::new(FakeClient::new(&[0, 1, 2], adder));
        let (judger, store) = judger(3, client.clone());
        let resp = judger.judge(&submission(Some("carol"))).await;

        assert_eq!(resp.status, -2);
        assert_eq!(resp.reason, NO_HOST_REASON);
        assert!(resp.stdout.is_none());
        assert_eq!(client.calls().len(), 3);
        assert!(judger.pool().online().is_empty());
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_problem() {
        let client = Arc::new(FakeClient::new(&[], adder));
        let (judger, _) = judger(1, client.clone());
        let mut sub = submission(None);
        sub.problem_id = "404".to_string();
        let resp = judger.judge(&sub).await;

        assert_eq!(resp.status, -2);
        assert_eq!(resp.reason, NO_PROBLEM_REASON);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tests_fall_back_to_raw_input() {
        let client = Arc::new(FakeClient::new(&[], echo));
        let (judger, _) = judger(1, client);
        let problem = Problem {
            number: "2".to_string(),
            tests: Some("{broken".to_string()),
            ..Problem::default()
        };
        let mut sub = submission(None);
        sub.input = "hello  \n\n".to_string();

        let JudgeOutcome::Completed(report) = judger.judge_problem(&problem, &sub).await else {
            panic!("expected a completed judge");
        };
        assert_eq!(report.cases.len(), 1);
        assert_eq!(report.cases[0].output, "hello");
        assert_eq!(report.cases[0].expected, "");
        assert_eq!(report.summary.overall, "0/1 Passed");
    }

    #[tokio::test]
    async fn test_trailing_whitespace_is_ignored() {
        let client = Arc::new(FakeClient::new(&[], |_| ok("3 \n\t\n")));
        let (judger, _) = judger(1, client);
        let problem = Problem {
            number: "3".to_string(),
            tests: Some(r#"[{"input":"","expect":"3\n"}]"#.to_string()),
            ..Problem::default()
        };
        let JudgeOutcome::Completed(report) = judger.judge_problem(&problem, &submission(None)).await
        else {
            panic!("expected a completed judge");
        };
        assert!(report.cases[0].pass);
        assert_eq!(report.cases[0].output, "3");
    }

    #[tokio::test]
    async fn test_dispatch_prefers_least_loaded_host() {
        let client = Arc::new(FakeClient::new(&[], echo));
        let (judger, _) = judger(2, client.clone());
        let busy = judger.pool().host(0).unwrap().acquire();
        tokio_test::assert_ok!(judger.dispatch(&ExecuteRequest::default()).await);
        drop(busy);
        assert_eq!(client.calls(), vec![1]);
    }
}
