use anyhow::{anyhow, bail, Result};

use std::io::Write;

use crate::common::GenerationRequest;
use crate::cycle::RequestState;
use crate::server::GenerateResponse;

const HELP: &str = "\
Type a prompt to weave a poem, or one of:
  :regen                 regenerate with the last request
  :clear                 clear prompt, poem and error
  :set <param> <value>   max_length, temperature or top_p
  :params                show current parameters
  :quit                  leave";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Prompt(String),
    Regenerate,
    Clear,
    Set(String, String),
    Params,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command> {
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Prompt(line.to_string()));
    };
    let mut words = rest.split_whitespace();
    let command = match (words.next(), words.next(), words.next()) {
        (Some("regen"), None, None) => Command::Regenerate,
        (Some("clear"), None, None) => Command::Clear,
        (Some("set"), Some(name), Some(value)) => Command::Set(name.to_string(), value.to_string()),
        (Some("params"), None, None) => Command::Params,
        (Some("help"), None, None) => Command::Help,
        (Some("quit" | "q"), None, None) => Command::Quit,
        _ => bail!("unknown command {line:?}, try :help"),
    };
    if words.next().is_some() {
        bail!("too many arguments in {line:?}");
    }
    Ok(command)
}

fn apply_setting(params: &mut GenerationRequest, name: &str, value: &str) -> Result<()> {
    match name {
        "max_length" => params.max_length = value.parse()?,
        "temperature" => params.temperature = value.parse()?,
        "top_p" => params.top_p = value.parse()?,
        _ => return Err(anyhow!("unknown parameter {name:?}")),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub async fn run_client(port: u16) -> Result<()> {
    println!("Running client against http://localhost:{port} (:help for commands)");

    let base = format!("http://localhost:{port}/api");
    let reqwest_client = reqwest::Client::new();
    let mut params = GenerationRequest::default();
    let mut line = String::new();

    loop {
        print!("poem> ");
        std::io::stdout().flush()?;

        line.clear();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        if handle_line(&reqwest_client, &base, &mut params, line.trim()).await == Flow::Quit {
            break;
        }
    }

    Ok(())
}

/// Runs one line of input. Failures are printed, never fatal to the session.
async fn handle_line(
    reqwest_client: &reqwest::Client,
    base: &str,
    params: &mut GenerationRequest,
    line: &str,
) -> Flow {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(err) => {
            println!("{err}");
            return Flow::Continue;
        }
    };

    let request = match command {
        Command::Prompt(prompt) => {
            *params = params.with_prompt(prompt);
            reqwest_client
                .post(format!("{base}/generate"))
                .json(&*params)
        }
        Command::Regenerate => reqwest_client.post(format!("{base}/regenerate")),
        Command::Clear => reqwest_client.post(format!("{base}/clear")),
        Command::Set(name, value) => {
            match apply_setting(params, &name, &value) {
                Ok(()) => println!("{name} = {value}"),
                Err(err) => println!("{err}"),
            }
            return Flow::Continue;
        }
        Command::Params => {
            println!(
                "max_length = {}, temperature = {}, top_p = {}",
                params.max_length, params.temperature, params.top_p
            );
            return Flow::Continue;
        }
        Command::Help => {
            println!("{HELP}");
            return Flow::Continue;
        }
        Command::Quit => return Flow::Quit,
    };

    match send(request).await {
        Ok(response) => print_response(&response),
        Err(err) => println!("Request failed: {err:#}"),
    }
    Flow::Continue
}

async fn send(request: reqwest::RequestBuilder) -> Result<GenerateResponse> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|err| anyhow!("{status}: {} ({err})", body.trim()))
}

fn print_response(response: &GenerateResponse) {
    if let Some(notice) = &response.notice {
        println!("{notice}");
        return;
    }
    match &response.snapshot.state {
        RequestState::Succeeded => {
            println!();
            println!("{}", response.snapshot.result.as_deref().unwrap_or_default());
            println!();
        }
        RequestState::Failed { message, .. } => println!("{message}"),
        RequestState::Idle => println!("Cleared."),
        RequestState::Generating => println!("Still generating..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn plain_lines_are_prompts() {
        assert_eq!(
            parse_command("When the world").unwrap(),
            Command::Prompt("When the world".to_string())
        );
        assert_eq!(parse_command("").unwrap(), Command::Prompt(String::new()));
    }

    #[test]
    fn colon_lines_are_commands() {
        assert_eq!(parse_command(":regen").unwrap(), Command::Regenerate);
        assert_eq!(parse_command(":q").unwrap(), Command::Quit);
        assert_eq!(
            parse_command(":set top_p 0.8").unwrap(),
            Command::Set("top_p".to_string(), "0.8".to_string())
        );
        assert!(parse_command(":set top_p").is_err());
        assert!(parse_command(":dance").is_err());
    }

    #[tokio::test]
    async fn non_json_reply_keeps_the_session_alive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(422).set_body_string("Failed to deserialize the JSON body"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/api", server.uri());
        let mut params = GenerationRequest::default();
        let flow = handle_line(&reqwest::Client::new(), &base, &mut params, "Love and").await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(params.prompt, "Love and");
    }

    #[tokio::test]
    async fn send_reports_status_and_body_of_bad_replies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/clear"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = send(reqwest::Client::new().post(format!("{}/api/clear", server.uri())))
            .await
            .expect_err("plain text body");
        assert!(err.to_string().starts_with("500 Internal Server Error: boom"));
    }

    #[tokio::test]
    async fn unreachable_server_keeps_the_session_alive() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", listener.local_addr().unwrap());
        drop(listener);

        let mut params = GenerationRequest::default();
        let flow = handle_line(&reqwest::Client::new(), &base, &mut params, ":regen").await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            handle_line(&reqwest::Client::new(), &base, &mut params, ":quit").await,
            Flow::Quit
        );
    }

    #[test]
    fn settings_update_parameters() {
        let mut params = GenerationRequest::default();
        apply_setting(&mut params, "max_length", "300").unwrap();
        apply_setting(&mut params, "temperature", "1.2").unwrap();
        assert_eq!(params.max_length, 300);
        assert_eq!(params.temperature, 1.2);
        assert!(apply_setting(&mut params, "top_k", "5").is_err());
        assert!(apply_setting(&mut params, "max_length", "lots").is_err());
    }
}
