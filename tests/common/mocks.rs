use chat_responder::{
    Error, Result,
    model::{GenerationParams, LanguageModel},
};
use mockall::mock;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

pub const FAKE_EOS: &str = "<eos>";
pub const FAKE_EOS_ID: u32 = 1000;

mock! {
    pub Model {}

    impl LanguageModel for Model {
        fn eos_token(&self) -> &str;
        fn eos_token_id(&self) -> u32;
        fn encode(&self, text: &str) -> Result<Vec<u32>>;
        fn generate(&self, input: &[u32], params: &GenerationParams) -> Result<Vec<u32>>;
        fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String>;
    }
}

/// Byte-level stand-in for the real model with fault injection.
///
/// Every byte is a token. Generation appends `reply` and then the EOS id.
/// Prompts containing `fail_on` make generation fail, prompts containing
/// `panic_on` make it panic. `delay` stalls every generation, or only
/// prompts containing `delay_on` when that is set.
#[derive(Debug, Clone)]
pub struct FakeModel {
    pub reply: String,
    pub fail_on: Option<String>,
    pub panic_on: Option<String>,
    pub delay: Option<Duration>,
    pub delay_on: Option<String>,
    pub generate_calls: Arc<AtomicUsize>,
}

impl FakeModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_on: None,
            panic_on: None,
            delay: None,
            delay_on: None,
            generate_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_failure_on(mut self, trigger: &str) -> Self {
        self.fail_on = Some(trigger.to_string());
        self
    }

    pub fn with_panic_on(mut self, trigger: &str) -> Self {
        self.panic_on = Some(trigger.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delay_on(mut self, trigger: &str, delay: Duration) -> Self {
        self.delay_on = Some(trigger.to_string());
        self.delay = Some(delay);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    fn prompt_text(input: &[u32]) -> String {
        let bytes: Vec<u8> = input
            .iter()
            .filter_map(|&t| u8::try_from(t).ok())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl LanguageModel for FakeModel {
    fn eos_token(&self) -> &str {
        FAKE_EOS
    }

    fn eos_token_id(&self) -> u32 {
        FAKE_EOS_ID
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let (body, has_eos) = match text.strip_suffix(FAKE_EOS) {
            Some(body) => (body, true),
            None => (text, false),
        };
        let mut tokens: Vec<u32> = body.bytes().map(u32::from).collect();
        if has_eos {
            tokens.push(FAKE_EOS_ID);
        }
        Ok(tokens)
    }

    fn generate(&self, input: &[u32], params: &GenerationParams) -> Result<Vec<u32>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);

        let prompt = Self::prompt_text(input);
        if let Some(delay) = self.delay {
            let triggered = self
                .delay_on
                .as_ref()
                .is_none_or(|trigger| prompt.contains(trigger.as_str()));
            if triggered {
                std::thread::sleep(delay);
            }
        }

        if let Some(trigger) = &self.panic_on {
            if prompt.contains(trigger.as_str()) {
                panic!("injected panic");
            }
        }
        if let Some(trigger) = &self.fail_on {
            if prompt.contains(trigger.as_str()) {
                return Err(Error::generation("injected failure: out of memory"));
            }
        }

        let mut output = input.to_vec();
        output.extend(self.reply.bytes().map(u32::from));
        output.push(FAKE_EOS_ID);
        output.truncate(params.max_length.max(input.len()));
        Ok(output)
    }

    fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String> {
        let mut bytes = Vec::with_capacity(tokens.len());
        for &token in tokens {
            if token == FAKE_EOS_ID {
                if !skip_special_tokens {
                    bytes.extend_from_slice(FAKE_EOS.as_bytes());
                }
                continue;
            }
            let byte = u8::try_from(token)
                .map_err(|_| Error::tokenizer(format!("unknown token id {}", token)))?;
            bytes.push(byte);
        }
        String::from_utf8(bytes).map_err(|e| Error::tokenizer(e.to_string()))
    }
}
