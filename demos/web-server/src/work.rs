//! Demo task: look around the base directory and write a notes file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use taskgate_core::{ChangeKind, ChangePaths, LogKind};
use taskgate_executor::{Answer, ButtonChoice, TaskContext, TaskWork, WorkError};
use taskgate_transport::UploadStore;

/// File the demo writes into the base directory.
pub const NOTES_FILE: &str = "TASK_NOTES.md";

/// Stand-in for a real agent. Exercises every capability of the context.
pub struct NotesWork {
    uploads: UploadStore,
}

impl NotesWork {
    pub const fn new(uploads: UploadStore) -> Self {
        Self { uploads }
    }
}

#[async_trait]
impl TaskWork for NotesWork {
    async fn run(&self, ctx: TaskContext) -> Result<String, WorkError> {
        let base_dir = PathBuf::from(&ctx.task().base_dir);
        if !tokio::fs::metadata(&base_dir).await?.is_dir() {
            return Err(WorkError::Failed(format!("{} is not a directory", base_dir.display())));
        }

        ctx.log(format!("Inspecting {}", base_dir.display()));
        let entries = list_names(&base_dir).await?;
        ctx.record(ChangeKind::ListDirectory, ChangePaths::single(path_str(&base_dir)))?;
        ctx.log_action(format!("Found {} entries", entries.len()));

        for reference in &ctx.task().uploaded_files {
            match self.uploads.resolve(reference) {
                Some(path) => {
                    ctx.record(ChangeKind::ReadFile, ChangePaths::single(path_str(&path)))?;
                    ctx.log_action(format!("Read attachment {reference}"));
                }
                None => ctx.log_as(format!("Attachment {reference} not found"), LogKind::Warning),
            }
        }

        let heading = match ctx.ask("Title for the notes? (yes keeps the default)", true).await? {
            Answer::Text(title) if !title.trim().is_empty() => title.trim().to_string(),
            Answer::Button(ButtonChoice::No) => String::new(),
            _ => ctx.task().title(),
        };

        let notes_path = base_dir.join(NOTES_FILE);
        let exists = tokio::fs::try_exists(&notes_path).await?;
        let contents = render_notes(&heading, &ctx.task().prompt, &entries);
        let verb = if exists { "Update" } else { "Create" };

        let decision = ctx
            .confirm(
                format!("{verb} {}?", notes_path.display()),
                Some(contents.clone()),
            )
            .await?;
        if !decision.is_approved() {
            ctx.log_as("Notes not written", LogKind::Warning);
            return Ok("Finished without writing notes".into());
        }

        tokio::fs::write(&notes_path, contents).await?;
        let kind = if exists {
            ChangeKind::UpdateFile
        } else {
            ChangeKind::CreateFile
        };
        ctx.record(kind, ChangePaths::single(path_str(&notes_path)))?;
        ctx.log_as(format!("Wrote {}", notes_path.display()), LogKind::Success);

        Ok(format!("Notes written to {}", notes_path.display()))
    }
}

async fn list_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn render_notes(heading: &str, prompt: &str, entries: &[String]) -> String {
    let mut out = String::new();
    if !heading.is_empty() {
        out.push_str(&format!("# {heading}\n\n"));
    }
    out.push_str("## Prompt\n\n");
    out.push_str(prompt.trim());
    out.push_str("\n\n## Directory\n\n");
    for name in entries {
        out.push_str(&format!("- {name}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskgate_core::{ContextUpdate, TaskData};
    use taskgate_session::ConnectionRegistry;
    use taskgate_transport::{
        protocol::{AnswerPayload, ButtonPayload, DecisionPayload},
        LocalClient, ServerMessage,
    };

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("taskgate-demo-{}", uuid::Uuid::new_v4()))
    }

    async fn until_interaction(client: &mut LocalClient) -> ServerMessage {
        loop {
            let msg = client.recv().await.unwrap();
            if matches!(
                msg,
                ServerMessage::ConfirmationRequest { .. } | ServerMessage::AskQuestionRequest { .. }
            ) {
                return msg;
            }
        }
    }

    #[test]
    fn test_render_notes() {
        let notes = render_notes("Plan", " tidy up \n", &["a.rs".into(), "b.rs".into()]);
        assert!(notes.starts_with("# Plan\n"));
        assert!(notes.contains("tidy up\n"));
        assert!(notes.ends_with("- a.rs\n- b.rs\n"));
        assert!(render_notes("", "x", &[]).starts_with("## Prompt"));
    }

    #[tokio::test]
    async fn test_notes_written_after_approval() {
        let dir = temp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("main.rs"), "fn main() {}").await.unwrap();

        let uploads = UploadStore::new(dir.join(".uploads"));
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(NotesWork::new(uploads))));
        let (mut client, _handle) = LocalClient::connect(registry);

        let mut task = TaskData::new(path_str(&dir), "Document the layout");
        task.uploaded_files = vec!["missing.png".into()];
        client.start_task(task).unwrap();

        assert!(matches!(
            until_interaction(&mut client).await,
            ServerMessage::AskQuestionRequest { allows_yes_no: true, .. }
        ));
        client
            .answer(AnswerPayload::Button(ButtonPayload::Yes))
            .unwrap();

        let ServerMessage::ConfirmationRequest { diff: Some(diff), .. } =
            until_interaction(&mut client).await
        else {
            panic!("expected confirmation with a preview");
        };
        assert!(diff.starts_with("# Document the layout"));
        assert!(diff.contains("- main.rs"));
        client.confirm(DecisionPayload::Yes).unwrap();

        let rest = client.recv_until_terminal().await;
        assert!(matches!(rest.last(), Some(ServerMessage::TaskComplete { .. })));
        let kinds: Vec<ChangeKind> = rest
            .iter()
            .filter_map(|m| match m {
                ServerMessage::ContextUpdate(ContextUpdate::Single { entry: Some(e), .. }) => {
                    Some(e.kind)
                }
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ChangeKind::CreateFile]);

        let written = tokio::fs::read_to_string(dir.join(NOTES_FILE)).await.unwrap();
        assert!(written.contains("Document the layout"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_missing_base_dir_fails() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(NotesWork::new(
            UploadStore::new(temp_dir()),
        ))));
        let (mut client, _handle) = LocalClient::connect(registry);
        client
            .start_task(TaskData::new(path_str(&temp_dir()), "x"))
            .unwrap();

        let rest = client.recv_until_terminal().await;
        assert!(matches!(rest.last(), Some(ServerMessage::TaskError { .. })));
    }
}
