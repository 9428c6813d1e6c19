//! Turns feed events into chat messages.

use std::fmt;

use crate::event::{EventRecord, Field};

/// Every message shape the bot knows how to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<'a> {
    PullRequestOpened {
        author: Field<&'a str>,
        url: Field<&'a str>,
    },
    PullRequestMerged {
        url: Field<&'a str>,
    },
    PullRequestClosed {
        number: Field<u64>,
        title: Field<&'a str>,
        repo: Field<&'a str>,
    },
    PullRequestReopened {
        number: Field<u64>,
        title: Field<&'a str>,
        repo: Field<&'a str>,
    },
    Push {
        repo: Field<&'a str>,
        branch: Field<&'a str>,
        /// First line of each commit message, oldest first, already escaped.
        commits: Vec<String>,
    },
    IssueComment {
        author: Field<&'a str>,
        number: Field<u64>,
        title: Field<&'a str>,
        repo: Field<&'a str>,
        body: Field<&'a str>,
    },
    BranchCreated {
        branch: Field<&'a str>,
        repo: Field<&'a str>,
        author: Field<&'a str>,
    },
    RepositoryCreated {
        repo: Field<&'a str>,
        author: Field<&'a str>,
    },
    BranchDeleted {
        branch: Field<&'a str>,
        repo: Field<&'a str>,
        author: Field<&'a str>,
    },
    UnsupportedAction {
        event_type: Field<&'a str>,
        action: Field<&'a str>,
    },
    UnsupportedRefType {
        event_type: &'static str,
        ref_type: Field<&'a str>,
    },
    Unsupported {
        event_type: Field<&'a str>,
    },
}

impl<'a> Notification<'a> {
    pub fn classify(event: &'a EventRecord) -> Self {
        match event.event_type() {
            Field::Present("PullRequestEvent") => pull_request(event),
            Field::Present("PushEvent") => push(event),
            Field::Present("IssueCommentEvent") => Self::IssueComment {
                author: event.actor(),
                number: event.get("payload.issue.number").u64(),
                title: event.get("payload.issue.title").str(),
                repo: event.repo_name(),
                body: event.get("payload.comment.body").str(),
            },
            Field::Present("CreateEvent") => create(event),
            Field::Present("DeleteEvent") => delete(event),
            event_type => Self::Unsupported { event_type },
        }
    }
}

fn pull_request(event: &EventRecord) -> Notification<'_> {
    let pr = event.get("payload.pull_request");
    let url = pr.get("html_url").str();
    match event.action() {
        Field::Present("opened") => Notification::PullRequestOpened {
            author: event.actor(),
            url,
        },
        Field::Present("closed") if pr.get("merged").bool().unwrap_or(false) => {
            Notification::PullRequestMerged { url }
        },
        Field::Present("closed") => Notification::PullRequestClosed {
            number: pr.get("number").u64().or(event.get("payload.number").u64()),
            title: pr.get("title").str(),
            repo: event.repo_name(),
        },
        Field::Present("reopened") => Notification::PullRequestReopened {
            number: pr.get("number").u64().or(event.get("payload.number").u64()),
            title: pr.get("title").str(),
            repo: event.repo_name(),
        },
        action => Notification::UnsupportedAction {
            event_type: event.event_type(),
            action,
        },
    }
}

fn push(event: &EventRecord) -> Notification<'_> {
    let git_ref = event.get("payload.ref").str();
    let commits = event
        .get("payload.commits")
        .items()
        .iter()
        .map(|commit| {
            let message = commit.get("message").str().unwrap_or("");
            break_fences(&escape_template(message.lines().next().unwrap_or("")))
        })
        .collect();
    Notification::Push {
        repo: event.repo_name(),
        branch: git_ref.map(|r| r.strip_prefix("refs/heads/").unwrap_or(r)),
        commits,
    }
}

fn create(event: &EventRecord) -> Notification<'_> {
    let ref_type = event.get("payload.ref_type").str();
    match ref_type {
        Field::Present("branch") => Notification::BranchCreated {
            branch: event.get("payload.ref").str(),
            repo: event.repo_name(),
            author: event.actor(),
        },
        Field::Present("repository") => Notification::RepositoryCreated {
            repo: event.repo_name(),
            author: event.actor(),
        },
        _ => Notification::UnsupportedRefType {
            event_type: "CreateEvent",
            ref_type,
        },
    }
}

fn delete(event: &EventRecord) -> Notification<'_> {
    let ref_type = event.get("payload.ref_type").str();
    match ref_type {
        Field::Present("branch") => Notification::BranchDeleted {
            branch: event.get("payload.ref").str(),
            repo: event.repo_name(),
            author: event.actor(),
        },
        _ => Notification::UnsupportedRefType {
            event_type: "DeleteEvent",
            ref_type,
        },
    }
}

/// Double `{` and `}` so commit text cannot be read as format placeholders
/// by whatever renders the message downstream.
pub fn escape_template(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// Keep text from closing the surrounding code block: a zero-width space
/// goes before every third consecutive backtick.
pub fn break_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0;
    for ch in text.chars() {
        if ch == '`' {
            run += 1;
            if run == 3 {
                out.push('\u{200B}');
                run = 1;
            }
        } else {
            run = 0;
        }
        out.push(ch);
    }
    out
}

impl fmt::Display for Notification<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullRequestOpened { author, url } => {
                write!(f, "New pull request from {author}:\n{url}")
            },
            Self::PullRequestMerged { url } => write!(f, "Merged pull request:\n{url}"),
            Self::PullRequestClosed {
                number,
                title,
                repo,
            } => write!(f, "Pull request #{number} closed: {title} ({repo})"),
            Self::PullRequestReopened {
                number,
                title,
                repo,
            } => write!(f, "Pull request #{number} reopened: {title} ({repo})"),
            Self::Push {
                repo,
                branch,
                commits,
            } => {
                writeln!(f, "New code has been pushed to {repo} ({branch}):")?;
                writeln!(f, "```")?;
                for line in commits {
                    writeln!(f, "{line}")?;
                }
                write!(f, "```")
            },
            Self::IssueComment {
                author,
                number,
                title,
                repo,
                body,
            } => {
                let body = body.map(break_fences);
                write!(
                    f,
                    "New comment from {author} on #{number} {title} in {repo}:\n```\n{body}\n```"
                )
            },
            Self::BranchCreated {
                branch,
                repo,
                author,
            } => write!(f, "New branch {branch} created in {repo} by {author}"),
            Self::RepositoryCreated { repo, author } => {
                write!(f, "New repository {repo} created by {author}")
            },
            Self::BranchDeleted {
                branch,
                repo,
                author,
            } => write!(f, "Branch {branch} deleted from {repo} by {author}"),
            Self::UnsupportedAction { event_type, action } => {
                write!(f, "Action {action} for event {event_type} not implemented")
            },
            Self::UnsupportedRefType {
                event_type,
                ref_type,
            } => write!(f, "{event_type} not implemented for ref_type {ref_type}"),
            Self::Unsupported { event_type } => write!(f, "Event not implemented: {event_type}"),
        }
    }
}

/// Render one event as a chat message. Never fails; missing fields render
/// as [`crate::event::ABSENT`].
pub fn translate(event: &EventRecord) -> String {
    Notification::classify(event).to_string()
}
