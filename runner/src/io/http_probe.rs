//! Login-form probe over plain HTTP.
//!
//! The probe runs a fixed plan, one stage per driver step: load the target,
//! scrape its login form, fill the username and the injection payload, submit,
//! and judge the response. It then submits each configured XSS payload through
//! every text input of the form and reports unencoded reflections.
//! Recoverable transport failures surface as [`StepError`]s and the plan moves
//! on; a page without a login form is fatal.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url, redirect};
use scraper::{Html, Selector};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::outcome::{Action, ActionReport, StepOutcome};
use crate::core::types::{Finding, Severity};
use crate::executor::{ActionExecutor, ExecutorFactory, RunContext, StepError};
use crate::io::config::ProbeConfig;

const SUBMIT_BUTTON: &str = "button[type=\"submit\"]";

/// A login form found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Absolute submission URL.
    pub action: Url,
    pub method: Method,
    pub username_field: String,
    pub password_field: String,
    /// Every text-like input, username included, in document order.
    pub text_fields: Vec<String>,
    /// Hidden inputs submitted unchanged (CSRF tokens and the like).
    pub hidden: Vec<(String, String)>,
}

impl LoginForm {
    pub fn username_selector(&self) -> String {
        field_selector(&self.username_field)
    }

    pub fn password_selector(&self) -> String {
        field_selector(&self.password_field)
    }
}

fn field_selector(name: &str) -> String {
    format!("input[name=\"{name}\"]")
}

/// Find the first form holding a password input and a text-like username input.
pub fn find_login_form(html: &str, base: &Url) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").ok()?;
    let input_selector = Selector::parse("input[name]").ok()?;

    document.select(&form_selector).find_map(|form| {
        let mut password_field = None;
        let mut text_fields = Vec::new();
        let mut hidden = Vec::new();
        for input in form.select(&input_selector) {
            let element = input.value();
            let Some(name) = element.attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
            match kind.as_str() {
                "password" if password_field.is_none() => password_field = Some(name.to_string()),
                "text" | "email" | "search" | "tel" | "url" => text_fields.push(name.to_string()),
                "hidden" => hidden.push((
                    name.to_string(),
                    element.attr("value").unwrap_or_default().to_string(),
                )),
                _ => {}
            }
        }

        let action = match form.value().attr("action").map(str::trim) {
            Some(action) if !action.is_empty() => base.join(action).ok()?,
            _ => base.clone(),
        };
        let method = match form.value().attr("method") {
            Some(m) if m.eq_ignore_ascii_case("post") => Method::POST,
            _ => Method::GET,
        };

        Some(LoginForm {
            action,
            method,
            username_field: text_fields.first().cloned()?,
            password_field: password_field?,
            text_fields,
            hidden,
        })
    })
}

/// What the server answered to a submitted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: StatusCode,
    /// Resolved `Location` of a redirect.
    pub location: Option<Url>,
    pub body: String,
}

/// Evidence of a successful login, if any.
///
/// A redirect away from the form page counts, as does a success indicator in
/// a body that no longer asks for a password.
pub fn detect_bypass(
    response: &ProbeResponse,
    form_page: &Url,
    indicators: &[String],
) -> Option<String> {
    if response.status.is_redirection() {
        return response
            .location
            .as_ref()
            .filter(|location| location.path() != form_page.path())
            .map(|location| format!("redirected to {location}"));
    }

    if !response.status.is_success() {
        return None;
    }
    if find_login_form(&response.body, form_page).is_some() {
        return None;
    }
    let body = response.body.to_lowercase();
    indicators
        .iter()
        .find(|indicator| body.contains(&indicator.to_lowercase()))
        .map(|indicator| format!("response contains '{indicator}'"))
}

/// Markup characters of `payload` that came back unencoded, or `None` when
/// the payload was not reflected in a dangerous form.
///
/// The payload must appear in the body (case-insensitively) and either a
/// script tag with `alert` must be present or every occurrence of one of
/// `< > " '` in the payload must be matched in the body.
pub fn detect_reflection(body: &str, payload: &str) -> Option<Vec<char>> {
    let page = body.to_lowercase();
    if !page.contains(&payload.to_lowercase()) {
        return None;
    }
    let unencoded: Vec<char> = ['<', '>', '"', '\'']
        .into_iter()
        .filter(|c| {
            let wanted = payload.matches(*c).count();
            wanted > 0 && body.matches(*c).count() >= wanted
        })
        .collect();
    let script = page.contains("<script>") && page.contains("alert");
    (script || !unencoded.is_empty()).then_some(unencoded)
}

/// Creates one [`HttpProbeExecutor`] per run, sharing connection pools.
///
/// Pages are loaded through a client that follows redirects; form submissions
/// go through one that does not, so a login redirect stays observable.
#[derive(Debug, Clone)]
pub struct HttpProbeFactory {
    page_client: Client,
    submit_client: Client,
    config: ProbeConfig,
}

impl HttpProbeFactory {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let page_client = Client::builder()
            .redirect(redirect::Policy::limited(config.max_redirects))
            .timeout(timeout)
            .build()
            .context("build page http client")?;
        let submit_client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context("build submit http client")?;
        Ok(Self {
            page_client,
            submit_client,
            config,
        })
    }

    pub fn executor(&self, target: &str) -> HttpProbeExecutor {
        HttpProbeExecutor {
            page_client: self.page_client.clone(),
            submit_client: self.submit_client.clone(),
            config: self.config.clone(),
            target: target.to_string(),
            stage: Stage::Load,
            page_url: None,
            page: None,
            form: None,
            response: None,
            reflected: 0,
        }
    }
}

impl ExecutorFactory for HttpProbeFactory {
    fn create(&self, target: &str) -> Box<dyn ActionExecutor> {
        Box::new(self.executor(target))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Load,
    Scrape,
    Fill,
    Submit,
    Evaluate,
    /// Index into text fields x payloads.
    Xss { attempt: usize },
    Finished,
}

/// Executor for a single run of the login probe.
pub struct HttpProbeExecutor {
    page_client: Client,
    submit_client: Client,
    config: ProbeConfig,
    target: String,
    stage: Stage,
    page_url: Option<Url>,
    page: Option<String>,
    form: Option<LoginForm>,
    response: Option<ProbeResponse>,
    /// Text fields found to reflect a payload.
    reflected: usize,
}

impl HttpProbeExecutor {
    async fn load(&mut self) -> Result<StepOutcome, StepError> {
        self.stage = Stage::Scrape;
        let url = Url::parse(&self.target)
            .map_err(|err| StepError::new(format!("invalid target {}: {err}", self.target)))?;
        let response = self
            .page_client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| StepError::new(format!("failed to load {url}: {err}")))?;
        let status = response.status();
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|err| StepError::new(format!("failed to read {url}: {err}")))?;
        debug!(%status, %final_url, bytes = body.len(), "target loaded");

        self.page_url = Some(final_url);
        self.page = Some(body);
        Ok(StepOutcome::Action(ActionReport::new(vec![Action::Load {
            url: self.target.clone(),
        }])))
    }

    fn scrape(&mut self) -> StepOutcome {
        let (Some(page), Some(page_url)) = (&self.page, &self.page_url) else {
            return StepOutcome::Fatal {
                reason: "no login form found: target page could not be loaded".to_string(),
            };
        };
        let Some(form) = find_login_form(page, page_url) else {
            return StepOutcome::Fatal {
                reason: format!("no login form found at {page_url}"),
            };
        };
        info!(action = %form.action, method = %form.method, "login form found");
        let observation = Action::Observe {
            message: format!("Found login form submitting to {}", form.action),
            data: Some(json!({
                "action": form.action.as_str(),
                "method": form.method.as_str(),
                "username_field": form.username_selector(),
                "password_field": form.password_selector(),
                "text_fields": form.text_fields.iter().map(|f| field_selector(f)).collect::<Vec<_>>(),
            })),
        };
        self.form = Some(form);
        self.stage = Stage::Fill;
        StepOutcome::Action(ActionReport::new(vec![observation]))
    }

    fn fill(&mut self, form: &LoginForm) -> StepOutcome {
        self.stage = Stage::Submit;
        StepOutcome::Action(ActionReport::new(vec![
            Action::Input {
                field: form.username_selector(),
                value: self.config.username.clone(),
            },
            Action::Input {
                field: form.password_selector(),
                value: self.config.payload.clone(),
            },
        ]))
    }

    /// Send `fields` plus the form's hidden inputs without following redirects.
    async fn send_form(
        &self,
        form: &LoginForm,
        mut fields: Vec<(String, String)>,
    ) -> Result<ProbeResponse, StepError> {
        fields.extend(form.hidden.iter().cloned());
        let request = if form.method == Method::POST {
            self.submit_client.post(form.action.clone()).form(&fields)
        } else {
            self.submit_client.get(form.action.clone()).query(&fields)
        };
        let response = request
            .send()
            .await
            .map_err(|err| StepError::new(format!("failed to submit form: {err}")))?;
        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| form.action.join(value).ok());
        let body = response
            .text()
            .await
            .map_err(|err| StepError::new(format!("failed to read form response: {err}")))?;
        debug!(%status, ?location, "form submitted");
        Ok(ProbeResponse {
            status,
            location,
            body,
        })
    }

    async fn submit(&mut self, form: &LoginForm) -> Result<StepOutcome, StepError> {
        self.stage = Stage::Evaluate;
        let fields = vec![
            (form.username_field.clone(), self.config.username.clone()),
            (form.password_field.clone(), self.config.payload.clone()),
        ];
        self.response = Some(self.send_form(form, fields).await?);
        Ok(StepOutcome::Action(ActionReport::new(vec![Action::Click {
            element: SUBMIT_BUTTON.to_string(),
        }])))
    }

    fn evaluate(&mut self, form: &LoginForm) -> StepOutcome {
        self.stage = Stage::Xss { attempt: 0 };
        let form_page = self.page_url.as_ref().unwrap_or(&form.action);
        let evidence = self
            .response
            .as_ref()
            .and_then(|response| detect_bypass(response, form_page, &self.config.success_indicators));

        let Some(evidence) = evidence else {
            return StepOutcome::Action(ActionReport::new(vec![Action::Observe {
                message: "No authentication bypass detected".to_string(),
                data: self
                    .response
                    .as_ref()
                    .map(|response| json!({ "status": response.status.as_u16() })),
            }]));
        };

        warn!(%evidence, "authentication bypass detected");
        let finding = Finding {
            title: "Authentication Bypass via SQL Injection".to_string(),
            vulnerability_type: "SQL Injection".to_string(),
            severity: Severity::High,
            description: format!(
                "Submitting '{}' as the password logged in as '{}' ({evidence}).",
                self.config.payload, self.config.username
            ),
            element: Some(form.password_selector()),
        };
        StepOutcome::Action(ActionReport::new(vec![
            Action::Observe {
                message: format!("Login accepted the injection payload: {evidence}"),
                data: None,
            },
            Action::Finding(finding),
        ]))
    }

    /// Submit one payload through one text field.
    ///
    /// Once a field reflects a payload its remaining payloads are skipped.
    async fn xss(&mut self, form: &LoginForm, attempt: usize) -> Result<StepOutcome, StepError> {
        let per_field = self.config.xss_payloads.len();
        let (Some(field), Some(payload)) = (
            form.text_fields.get(attempt / per_field.max(1)),
            self.config.xss_payloads.get(attempt % per_field.max(1)),
        ) else {
            return Ok(self.finish(form));
        };
        let field = field.clone();
        let payload = payload.clone();
        let selector = field_selector(&field);
        self.stage = Stage::Xss {
            attempt: attempt + 1,
        };

        let mut actions = Vec::new();
        if attempt % per_field == 0 {
            actions.push(Action::Observe {
                message: format!("Starting XSS test on {selector}"),
                data: Some(json!({ "payloads": per_field })),
            });
        }
        actions.push(Action::Input {
            field: selector.clone(),
            value: payload.clone(),
        });
        actions.push(Action::Click {
            element: SUBMIT_BUTTON.to_string(),
        });

        let fields = form
            .text_fields
            .iter()
            .map(|name| {
                let value = if *name == field {
                    payload.clone()
                } else {
                    String::new()
                };
                (name.clone(), value)
            })
            .chain(std::iter::once((form.password_field.clone(), String::new())))
            .collect();
        let response = self.send_form(form, fields).await?;

        if let Some(unencoded) = detect_reflection(&response.body, &payload) {
            warn!(field = %selector, %payload, "payload reflected without encoding");
            self.reflected += 1;
            self.stage = Stage::Xss {
                attempt: (attempt / per_field + 1) * per_field,
            };
            actions.push(Action::Finding(Finding {
                title: "Cross-Site Scripting Vulnerability".to_string(),
                vulnerability_type: "XSS".to_string(),
                severity: Severity::Medium,
                description: format!(
                    "XSS vulnerability detected with payload: {payload}. The input is reflected \
                     without proper encoding (unencoded: {}).",
                    unencoded.iter().collect::<String>()
                ),
                element: Some(selector),
            }));
        }
        Ok(StepOutcome::Action(ActionReport::new(actions)))
    }

    fn finish(&mut self, form: &LoginForm) -> StepOutcome {
        self.stage = Stage::Finished;
        let message = if self.reflected == 0 {
            format!(
                "XSS testing completed - no vulnerabilities detected in {} text field(s)",
                form.text_fields.len()
            )
        } else {
            format!(
                "XSS testing completed - {} of {} text field(s) reflect payloads",
                self.reflected,
                form.text_fields.len()
            )
        };
        StepOutcome::Action(ActionReport::new(vec![Action::Observe {
            message,
            data: Some(json!({ "vulnerability_count": self.reflected })),
        }]))
    }
}

#[async_trait]
impl ActionExecutor for HttpProbeExecutor {
    #[instrument(skip_all, fields(run_id = %ctx.run_id, step = ctx.step, stage = ?self.stage))]
    async fn next(&mut self, ctx: &RunContext) -> Result<StepOutcome, StepError> {
        let last_step = ctx.step >= ctx.max_steps;
        match self.stage {
            Stage::Load => self.load().await,
            Stage::Scrape => Ok(self.scrape()),
            Stage::Finished => Ok(summary(ctx, None)),
            Stage::Xss { attempt } if last_step => {
                info!(attempt, "step budget exhausted, skipping remaining XSS payloads");
                self.stage = Stage::Finished;
                Ok(summary(ctx, Some(attempt)))
            }
            Stage::Fill | Stage::Submit | Stage::Evaluate | Stage::Xss { .. } => {
                let Some(form) = self.form.clone() else {
                    return Ok(StepOutcome::Fatal {
                        reason: "login form missing before submission".to_string(),
                    });
                };
                match self.stage {
                    Stage::Fill => Ok(self.fill(&form)),
                    Stage::Submit => self.submit(&form).await,
                    Stage::Xss { attempt } => self.xss(&form, attempt).await,
                    _ => Ok(self.evaluate(&form)),
                }
            }
        }
    }
}

/// Final outcome; `skipped_at` is the XSS attempt the step budget cut off.
fn summary(ctx: &RunContext, skipped_at: Option<usize>) -> StepOutcome {
    let mut summary = format!("Login form probe finished with {} finding(s)", ctx.findings);
    if let Some(attempt) = skipped_at {
        summary.push_str(&format!(
            "; XSS testing stopped after {attempt} attempt(s) at step {} of {}",
            ctx.step, ctx.max_steps
        ));
    }
    StepOutcome::Done {
        summary: Some(summary),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    const LOGIN_PAGE: &str = r#"
<html><body>
    <h2>Login Page</h2>
    <form method="POST" action="/login">
        <input type="hidden" name="csrf" value="tok-1">
        <label for="username">Username:</label>
        <input type="text" id="username" name="username" required>
        <input type="password" id="password" name="password" required>
        <input type="submit" value="Login">
    </form>
    <p><small>Valid credentials: admin/secret123</small></p>
</body></html>"#;

    const DASHBOARD: &str = r#"
<html><body>
    <h1>Welcome to the Dashboard!</h1>
    <div class="success">Login successful!</div>
    <a href="/logout">Logout</a>
</body></html>"#;

    const SCRIPT_PAYLOAD: &str = "<script>alert('XSS')</script>";

    fn base() -> Url {
        Url::parse("http://localhost:8080/login").expect("url")
    }

    fn indicators() -> Vec<String> {
        ProbeConfig::default().success_indicators
    }

    fn ctx(step: u32, findings: usize) -> RunContext {
        RunContext {
            run_id: "r".to_string(),
            target: "http://localhost:8080/login".to_string(),
            step,
            max_steps: 25,
            findings,
        }
    }

    type Handler = fn(&str, &str, &str) -> String;

    /// Serve `handler(method, path, body)` on a local port, one request per connection.
    async fn serve(handler: Handler) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Some((method, path, body)) = read_request(&mut socket).await else {
                        return;
                    };
                    let response = handler(&method, &path, &body);
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{addr}/")).expect("url")
    }

    async fn read_request(socket: &mut TcpStream) -> Option<(String, String, String)> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            let Some(end) = text.find("\r\n\r\n") else {
                continue;
            };
            let head = &text[..end];
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if text.len() < end + 4 + length {
                continue;
            }
            let mut request_line = head.split_whitespace();
            let method = request_line.next()?.to_string();
            let path = request_line.next()?.to_string();
            return Some((method, path, text[end + 4..].to_string()));
        }
    }

    fn reply(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    fn form_value(body: &str, key: &str) -> String {
        let url = Url::parse(&format!("http://form.local/?{body}")).expect("form body");
        url.query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    }

    async fn run_plan(executor: &mut HttpProbeExecutor) -> (Vec<Action>, Option<String>) {
        let mut actions = Vec::new();
        for step in 1..=25 {
            let findings = actions
                .iter()
                .filter(|a| matches!(a, Action::Finding(_)))
                .count();
            match executor.next(&ctx(step, findings)).await.expect("step") {
                StepOutcome::Action(report) => actions.extend(report.actions),
                StepOutcome::Done { summary } => return (actions, summary),
                StepOutcome::Fatal { reason } => panic!("plan failed: {reason}"),
            }
        }
        panic!("plan did not finish within 25 steps");
    }

    #[test]
    fn finds_login_form_fields() {
        let form = find_login_form(LOGIN_PAGE, &base()).expect("form");
        assert_eq!(form.action.as_str(), "http://localhost:8080/login");
        assert_eq!(form.method, Method::POST);
        assert_eq!(form.username_field, "username");
        assert_eq!(form.password_field, "password");
        assert_eq!(form.text_fields, vec!["username".to_string()]);
        assert_eq!(form.hidden, vec![("csrf".to_string(), "tok-1".to_string())]);
        assert_eq!(form.password_selector(), "input[name=\"password\"]");
    }

    #[test]
    fn skips_forms_without_password() {
        let html = r#"
<form action="/search"><input name="q"></form>
<form action='auth' method=post>
  <input type=email name=user>
  <input name='pw' type='PASSWORD'>
  <input type=search name=filter>
</form>"#;
        let form = find_login_form(html, &base()).expect("form");
        assert_eq!(form.action.as_str(), "http://localhost:8080/auth");
        assert_eq!(form.username_field, "user");
        assert_eq!(form.password_field, "pw");
        assert_eq!(form.text_fields, vec!["user".to_string(), "filter".to_string()]);
        assert!(find_login_form("<form><input name=q></form>", &base()).is_none());
        assert!(find_login_form("<p>nothing here</p>", &base()).is_none());
    }

    #[test]
    fn form_without_action_submits_to_page() {
        let html = r#"<form><input name="u"><input type="password" name="p"></form>"#;
        let form = find_login_form(html, &base()).expect("form");
        assert_eq!(form.action, base());
        assert_eq!(form.method, Method::GET);
    }

    #[test]
    fn indicator_in_body_is_a_bypass() {
        let response = ProbeResponse {
            status: StatusCode::OK,
            location: None,
            body: DASHBOARD.to_string(),
        };
        let evidence = detect_bypass(&response, &base(), &indicators()).expect("bypass");
        assert!(evidence.contains("welcome"));
    }

    #[test]
    fn login_page_again_is_not_a_bypass() {
        let response = ProbeResponse {
            status: StatusCode::OK,
            location: None,
            body: LOGIN_PAGE.replace("</form>", "</form><div>Welcome back? Invalid password</div>"),
        };
        assert_eq!(detect_bypass(&response, &base(), &indicators()), None);
    }

    #[test]
    fn redirect_elsewhere_is_a_bypass() {
        let away = ProbeResponse {
            status: StatusCode::FOUND,
            location: Some(Url::parse("http://localhost:8080/dashboard").expect("url")),
            body: String::new(),
        };
        assert!(detect_bypass(&away, &base(), &indicators()).is_some());

        let back = ProbeResponse {
            location: Some(base()),
            ..away
        };
        assert_eq!(detect_bypass(&back, &base(), &indicators()), None);
    }

    #[test]
    fn reflected_payload_is_xss() {
        let body = format!("<p>Invalid credentials for {SCRIPT_PAYLOAD}</p>");
        let unencoded = detect_reflection(&body, SCRIPT_PAYLOAD).expect("reflection");
        assert_eq!(unencoded, vec!['<', '>', '\'']);

        let upper = "<p>Results for <SCRIPT>ALERT('XSS')</SCRIPT></p>";
        assert!(detect_reflection(upper, "<SCRIPT>alert('XSS')</SCRIPT>").is_some());
    }

    #[test]
    fn encoded_payload_is_not_xss() {
        let body = "<p>Invalid credentials for &lt;script&gt;alert(&#x27;XSS&#x27;)&lt;/script&gt;</p>";
        assert_eq!(detect_reflection(body, SCRIPT_PAYLOAD), None);
        assert_eq!(detect_reflection(DASHBOARD, SCRIPT_PAYLOAD), None);
    }

    #[tokio::test]
    async fn load_follows_redirect_to_login_page() {
        let server = serve(|_, path, _| match path {
            "/" => reply("302 Found", "Location: /login\r\n", ""),
            "/login" => reply("200 OK", "", LOGIN_PAGE),
            _ => reply("404 Not Found", "", ""),
        })
        .await;
        let factory = HttpProbeFactory::new(ProbeConfig::default()).expect("factory");
        let mut executor = factory.executor(server.as_str());

        let loaded = executor.next(&ctx(1, 0)).await.expect("load");
        assert!(matches!(loaded, StepOutcome::Action(_)));
        let scraped = executor.next(&ctx(2, 0)).await.expect("scrape");
        let StepOutcome::Action(report) = scraped else {
            panic!("expected the login form, got {scraped:?}");
        };
        let [Action::Observe {
            data: Some(data), ..
        }] = report.actions.as_slice()
        else {
            panic!("expected one observation, got {:?}", report.actions);
        };
        assert_eq!(data["action"], format!("{server}login"));
        assert_eq!(data["method"], "POST");
    }

    #[tokio::test]
    async fn reflected_input_is_reported_once_per_field() {
        let server = serve(|method, _, body| {
            if method == "POST" {
                let username = form_value(body, "username");
                reply("200 OK", "", &format!("<p>Invalid credentials for {username}</p>"))
            } else {
                reply("200 OK", "", LOGIN_PAGE)
            }
        })
        .await;
        let config = ProbeConfig {
            xss_payloads: vec![SCRIPT_PAYLOAD.to_string(), "<svg onload=alert('XSS')>".to_string()],
            ..ProbeConfig::default()
        };
        let factory = HttpProbeFactory::new(config).expect("factory");
        let mut executor = factory.executor(server.as_str());

        let (actions, summary) = run_plan(&mut executor).await;

        let findings: Vec<&Finding> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Finding(finding) => Some(finding),
                _ => None,
            })
            .collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].vulnerability_type, "XSS");
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].element.as_deref(), Some("input[name=\"username\"]"));
        assert!(findings[0].description.contains(SCRIPT_PAYLOAD));
        assert!(
            !actions
                .iter()
                .any(|a| matches!(a, Action::Input { value, .. } if value.starts_with("<svg")))
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Observe { message, .. } if message.starts_with("No authentication bypass")
        )));
        assert_eq!(
            summary.as_deref(),
            Some("Login form probe finished with 1 finding(s)")
        );
    }

    #[tokio::test]
    async fn missing_page_is_fatal_at_scrape() {
        let factory = HttpProbeFactory::new(ProbeConfig::default()).expect("factory");
        let mut executor = factory.executor("http://localhost/");
        executor.stage = Stage::Scrape;
        let outcome = executor.next(&ctx(2, 0)).await.expect("outcome");
        assert!(matches!(outcome, StepOutcome::Fatal { reason } if reason.contains("no login form found")));
    }

    #[tokio::test]
    async fn evaluate_without_response_observes_no_bypass() {
        let config = ProbeConfig {
            xss_payloads: Vec::new(),
            ..ProbeConfig::default()
        };
        let factory = HttpProbeFactory::new(config).expect("factory");
        let mut executor = factory.executor("http://localhost:8080/login");
        executor.page_url = Some(base());
        executor.form = find_login_form(LOGIN_PAGE, &base());
        executor.stage = Stage::Evaluate;

        let outcome = executor.next(&ctx(5, 0)).await.expect("outcome");
        let StepOutcome::Action(report) = outcome else {
            panic!("expected an action report");
        };
        assert!(matches!(
            report.actions.as_slice(),
            [Action::Observe { message, .. }] if message == "No authentication bypass detected"
        ));

        let xss = executor.next(&ctx(6, 0)).await.expect("outcome");
        assert!(matches!(
            xss,
            StepOutcome::Action(report) if matches!(
                report.actions.as_slice(),
                [Action::Observe { message, .. }] if message.starts_with("XSS testing completed")
            )
        ));

        let done = executor.next(&ctx(7, 0)).await.expect("outcome");
        assert!(matches!(done, StepOutcome::Done { summary: Some(_) }));
    }

    #[tokio::test]
    async fn last_step_ends_xss_testing_with_summary() {
        let factory = HttpProbeFactory::new(ProbeConfig::default()).expect("factory");
        let mut executor = factory.executor("http://localhost:8080/login");
        executor.form = find_login_form(LOGIN_PAGE, &base());
        executor.stage = Stage::Xss { attempt: 3 };

        let outcome = executor.next(&ctx(25, 2)).await.expect("outcome");
        let StepOutcome::Done {
            summary: Some(summary),
        } = outcome
        else {
            panic!("expected a summary, got {outcome:?}");
        };
        assert!(summary.starts_with("Login form probe finished with 2 finding(s)"));
        assert!(summary.contains("stopped after 3 attempt(s) at step 25 of 25"));
        assert_eq!(executor.stage, Stage::Finished);
    }
}
