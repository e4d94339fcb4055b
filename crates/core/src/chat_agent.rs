use crate::llm::{ChatCompletion, ChatMessage};
use crate::voice::{VoiceAgent, VoiceEvent};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 64;

/// A text-only `VoiceAgent` backed by a chat completions endpoint.
///
/// Questions are queued to one answer task per conversation, so `send_text`
/// returns as soon as the question is queued. Answers come back one at a
/// time in the order the questions were sent.
pub struct ChatAgent {
    chat: Arc<dyn ChatCompletion>,
    system_prompt: String,
    conversation: Option<ActiveConversation>,
}

/// The channels and answer task of the current conversation.
struct ActiveConversation {
    questions: mpsc::UnboundedSender<String>,
    events: mpsc::Sender<VoiceEvent>,
    answers: JoinHandle<()>,
}

impl ChatAgent {
    pub fn new(chat: Arc<dyn ChatCompletion>, system_prompt: impl Into<String>) -> Self {
        Self {
            chat,
            system_prompt: system_prompt.into(),
            conversation: None,
        }
    }

    /// Starts a fresh conversation with an empty history.
    ///
    /// The previous answer task is aborted and its event channel dropped, so
    /// nothing it was working on reaches the new receiver.
    fn open(&mut self) -> mpsc::Receiver<VoiceEvent> {
        self.close();
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let (questions, questions_rx) = mpsc::unbounded_channel();
        let answers = tokio::spawn(answer_questions(
            self.chat.clone(),
            self.system_prompt.clone(),
            questions_rx,
            events.clone(),
        ));
        self.conversation = Some(ActiveConversation {
            questions,
            events,
            answers,
        });
        rx
    }

    fn close(&mut self) {
        if let Some(conversation) = self.conversation.take() {
            conversation.answers.abort();
        }
    }
}

impl Drop for ChatAgent {
    fn drop(&mut self) {
        self.close();
    }
}

async fn answer_questions(
    chat: Arc<dyn ChatCompletion>,
    system_prompt: String,
    mut questions: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<VoiceEvent>,
) {
    let mut history: Vec<ChatMessage> = Vec::new();
    while let Some(question) = questions.recv().await {
        history.push(ChatMessage::user(question));
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_prompt.clone()));
        messages.extend(history.iter().cloned());

        let outgoing = match chat.complete(&messages, None).await {
            Ok(answer) => {
                history.push(ChatMessage::assistant(answer.clone()));
                vec![
                    VoiceEvent::Speaking,
                    VoiceEvent::AssistantTranscript(answer),
                    VoiceEvent::SpeakingDone,
                ]
            }
            Err(e) => {
                tracing::error!(error = ?e, "chat completion failed");
                // The question stays in history; the model sees it with the next one.
                vec![VoiceEvent::Error(e.to_string())]
            }
        };
        for event in outgoing {
            if events.send(event).await.is_err() {
                tracing::debug!("session closed before the answer was delivered");
                return;
            }
        }
    }
}

#[async_trait]
impl VoiceAgent for ChatAgent {
    async fn connect(&mut self) -> Result<mpsc::Receiver<VoiceEvent>> {
        let rx = self.open();
        if let Some(conversation) = &self.conversation {
            conversation.events.send(VoiceEvent::Connected).await?;
            conversation.events.send(VoiceEvent::Listening).await?;
        }
        Ok(rx)
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        let Some(conversation) = &self.conversation else {
            bail!("chat agent is not connected");
        };
        conversation
            .events
            .send(VoiceEvent::UserTranscript(text.clone()))
            .await?;
        conversation
            .questions
            .send(text)
            .map_err(|_| anyhow!("answer task has stopped"))
    }

    async fn reset(&mut self) -> Result<mpsc::Receiver<VoiceEvent>> {
        if self.conversation.is_none() {
            bail!("chat agent is not connected");
        }
        tracing::info!("chat agent history cleared");
        Ok(self.open())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChatCompletion;
    use crate::model::TranscriptEntry;
    use crate::voice::VoiceSession;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Holds back the answer to `slow_question` until `release` is notified.
    struct GatedChat {
        slow_question: &'static str,
        release: Arc<Notify>,
        calls: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl GatedChat {
        fn new(slow_question: &'static str) -> Arc<Self> {
            Arc::new(Self {
                slow_question,
                release: Arc::new(Notify::new()),
                calls: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatCompletion for GatedChat {
        async fn complete(&self, messages: &[ChatMessage], _: Option<u32>) -> Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let question = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if question == self.slow_question {
                self.release.notified().await;
            }
            Ok(format!("answer to {question}"))
        }
    }

    async fn next(rx: &mut mpsc::Receiver<VoiceEvent>) -> VoiceEvent {
        rx.recv().await.expect("event")
    }

    #[tokio::test]
    async fn answers_are_reported_as_events() {
        let mut chat = MockChatCompletion::new();
        chat.expect_complete()
            .withf(|messages, _| {
                messages.len() == 2
                    && messages[0].role == "system"
                    && messages[1] == ChatMessage::user("What is the AI Act?")
            })
            .times(1)
            .returning(|_, _| Ok("An EU regulation on AI systems.".to_string()));
        let mut agent = ChatAgent::new(Arc::new(chat), "You answer policy questions.");

        let mut rx = agent.connect().await.unwrap();
        assert_eq!(next(&mut rx).await, VoiceEvent::Connected);
        assert_eq!(next(&mut rx).await, VoiceEvent::Listening);

        agent.send_text("What is the AI Act?".into()).await.unwrap();
        assert_eq!(
            next(&mut rx).await,
            VoiceEvent::UserTranscript("What is the AI Act?".into())
        );
        assert_eq!(next(&mut rx).await, VoiceEvent::Speaking);
        assert_eq!(
            next(&mut rx).await,
            VoiceEvent::AssistantTranscript("An EU regulation on AI systems.".into())
        );
        assert_eq!(next(&mut rx).await, VoiceEvent::SpeakingDone);
    }

    #[tokio::test]
    async fn follow_ups_carry_history() {
        let mut chat = MockChatCompletion::new();
        chat.expect_complete()
            .withf(|messages, _| messages.len() == 2)
            .times(1)
            .returning(|_, _| Ok("first answer".to_string()));
        chat.expect_complete()
            .withf(|messages, _| {
                messages.len() == 4 && messages[2] == ChatMessage::assistant("first answer")
            })
            .times(1)
            .returning(|_, _| Ok("second answer".to_string()));
        let mut agent = ChatAgent::new(Arc::new(chat), "prompt");
        let mut rx = agent.connect().await.unwrap();

        agent.send_text("first".into()).await.unwrap();
        agent.send_text("second".into()).await.unwrap();

        let mut answers = Vec::new();
        while answers.len() < 2 {
            if let VoiceEvent::AssistantTranscript(answer) = next(&mut rx).await {
                answers.push(answer);
            }
        }
        assert_eq!(answers, ["first answer", "second answer"]);
    }

    #[tokio::test]
    async fn completion_failure_becomes_an_error_event() {
        let mut chat = MockChatCompletion::new();
        chat.expect_complete()
            .returning(|_, _| Err(anyhow!("429 Too Many Requests")));
        let mut agent = ChatAgent::new(Arc::new(chat), "prompt");
        let mut rx = agent.connect().await.unwrap();

        agent.send_text("hello".into()).await.unwrap();
        let mut last = next(&mut rx).await;
        while !matches!(last, VoiceEvent::Error(_)) {
            last = next(&mut rx).await;
        }
        assert_eq!(last, VoiceEvent::Error("429 Too Many Requests".into()));
    }

    #[tokio::test]
    async fn send_text_does_not_wait_for_the_previous_answer() {
        let chat = GatedChat::new("first");
        let mut agent = ChatAgent::new(chat.clone(), "prompt");
        let mut rx = agent.connect().await.unwrap();

        agent.send_text("first".into()).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::timeout(Duration::from_millis(100), agent.send_text("second".into()))
            .await
            .expect("second question queued while the first is unanswered")
            .unwrap();

        chat.release.notify_one();
        let mut answers = Vec::new();
        while answers.len() < 2 {
            if let VoiceEvent::AssistantTranscript(answer) = next(&mut rx).await {
                answers.push(answer);
            }
        }
        assert_eq!(answers, ["answer to first", "answer to second"]);
    }

    #[tokio::test]
    async fn reset_drops_pending_answers_and_history() {
        let chat = GatedChat::new("old question");
        let mut agent = ChatAgent::new(chat.clone(), "prompt");
        let mut old_rx = agent.connect().await.unwrap();
        agent.send_text("old question".into()).await.unwrap();
        tokio::task::yield_now().await;

        let mut rx = agent.reset().await.unwrap();
        chat.release.notify_one();
        agent.send_text("new question".into()).await.unwrap();

        assert_eq!(next(&mut rx).await, VoiceEvent::UserTranscript("new question".into()));
        assert_eq!(next(&mut rx).await, VoiceEvent::Speaking);
        assert_eq!(
            next(&mut rx).await,
            VoiceEvent::AssistantTranscript("answer to new question".into())
        );

        let last_call = chat.calls.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            last_call,
            [ChatMessage::system("prompt"), ChatMessage::user("new question")]
        );

        // The old stream ends without ever seeing the old answer.
        while let Some(event) = old_rx.recv().await {
            assert!(!matches!(event, VoiceEvent::AssistantTranscript(_)));
        }
    }

    #[tokio::test]
    async fn new_conversation_keeps_late_answers_out_of_the_transcript() {
        let chat = GatedChat::new("old question");
        let mut session = VoiceSession::new(ChatAgent::new(chat.clone(), "prompt"));
        session.start().await.unwrap();
        session.send_text("old question").await.unwrap();
        // Connected, Listening, then the question itself.
        for _ in 0..3 {
            session.next_event().await;
        }
        assert_eq!(session.transcript(), vec![TranscriptEntry::user("old question")]);

        session.new_conversation().await.unwrap();
        chat.release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.transcript().is_empty());

        session.send_text("new question").await.unwrap();
        while session.transcript().len() < 2 {
            session.next_event().await;
        }
        assert_eq!(
            session.transcript(),
            vec![
                TranscriptEntry::user("new question"),
                TranscriptEntry::assistant("answer to new question"),
            ]
        );
    }

    #[tokio::test]
    async fn reset_before_connect_fails() {
        let mut agent = ChatAgent::new(Arc::new(MockChatCompletion::new()), "prompt");
        assert!(agent.reset().await.is_err());
    }

    #[tokio::test]
    async fn sending_before_connect_fails() {
        let mut agent = ChatAgent::new(Arc::new(MockChatCompletion::new()), "prompt");
        assert!(agent.send_text("hello".into()).await.is_err());
    }
}
