//! Packs ranked passages into a token-bounded context block.
//!
//! Each passage is rendered as `[n] text`, separated by blank lines. The
//! label counts as one token, so `total_tokens` equals the token count of
//! the rendered text.

use tracing::debug;

use crate::error::ContextOverflowError;
use crate::models::{ContextBlock, ContextConfig, ContextPassage, RankedPassage};
use crate::utils::{count_tokens, truncate_tokens};

const LABEL_TOKENS: usize = 1;

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    default_budget: usize,
    min_budget: usize,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Result<Self, ContextOverflowError> {
        let assembler = Self {
            default_budget: config.token_budget,
            min_budget: config.min_budget_tokens.max(LABEL_TOKENS + 1),
        };
        assembler.check_budget(config.token_budget, "")?;
        Ok(assembler)
    }

    pub fn default_budget(&self) -> usize {
        self.default_budget
    }

    /// The smallest budget that can hold a useful context for `query`.
    pub fn minimum_budget(&self, query: &str) -> usize {
        self.min_budget.max(count_tokens(query))
    }

    pub fn check_budget(&self, budget: usize, query: &str) -> Result<(), ContextOverflowError> {
        let minimum = self.minimum_budget(query);
        if budget < minimum {
            return Err(ContextOverflowError { budget, minimum });
        }
        Ok(())
    }

    /// Greedily add passages in rank order until the next one would exceed
    /// `budget`. If not even the first passage fits, it is truncated to
    /// exactly fill the budget.
    pub fn assemble(
        &self,
        passages: &[RankedPassage],
        budget: usize,
        query: &str,
    ) -> Result<ContextBlock, ContextOverflowError> {
        self.check_budget(budget, query)?;

        let mut block = ContextBlock::empty(budget);
        for passage in passages {
            let tokens = count_tokens(&passage.text);
            if tokens == 0 {
                continue;
            }
            let cost = tokens + LABEL_TOKENS;
            if block.total_tokens + cost > budget {
                break;
            }
            push_passage(&mut block, passage, &passage.text, false);
        }

        if block.is_empty() {
            if let Some(top) = passages.iter().find(|p| count_tokens(&p.text) > 0) {
                let truncated = truncate_tokens(&top.text, budget - LABEL_TOKENS);
                push_passage(&mut block, top, truncated, true);
            }
        }

        debug!(
            passages = block.passages.len(),
            candidates = passages.len(),
            tokens = block.total_tokens,
            budget,
            "assembled context"
        );
        Ok(block)
    }
}

fn push_passage(block: &mut ContextBlock, passage: &RankedPassage, text: &str, truncated: bool) {
    if !block.text.is_empty() {
        block.text.push_str("\n\n");
    }
    let label = format!("[{}] ", block.passages.len() + 1);
    block.text.push_str(&label);
    let start = block.text.len();
    block.text.push_str(text);
    let end = block.text.len();

    let token_count = count_tokens(text);
    block.total_tokens += token_count + LABEL_TOKENS;
    block.passages.push(ContextPassage {
        chunk_id: passage.chunk_id,
        document_id: passage.document_id.clone(),
        sequence: passage.sequence,
        score: passage.score,
        token_count,
        start,
        end,
        truncated,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(&ContextConfig {
            token_budget: 100,
            min_budget_tokens: 4,
            prompt_reserve_tokens: 10,
        })
        .unwrap()
    }

    fn passage(n: u128, words: usize) -> RankedPassage {
        let text = (0..words)
            .map(|i| format!("p{n}w{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        RankedPassage {
            chunk_id: Uuid::from_u128(n),
            document_id: "doc".into(),
            sequence: n as u32,
            score: 1.0 - n as f32 / 10.0,
            token_count: words as u32,
            text,
        }
    }

    #[test]
    fn test_greedy_packing_stops_at_budget() {
        let passages = vec![passage(1, 5), passage(2, 5), passage(3, 5)];
        // Each costs 6 tokens with its label.
        let block = assembler().assemble(&passages, 13, "q").unwrap();
        assert_eq!(block.passages.len(), 2);
        assert_eq!(block.total_tokens, 12);
        assert_eq!(count_tokens(&block.text), block.total_tokens);
        assert_eq!(block.passage_text(1), Some(passages[1].text.as_str()));
        assert!(block.text.starts_with("[1] p1w0"));
    }

    #[test]
    fn test_stops_at_first_passage_that_does_not_fit() {
        let passages = vec![passage(1, 5), passage(2, 20), passage(3, 1)];
        let block = assembler().assemble(&passages, 10, "q").unwrap();
        assert_eq!(block.passages.len(), 1);
    }

    #[test]
    fn test_truncates_top_passage_when_nothing_fits() {
        let passages = vec![passage(1, 50), passage(2, 40)];
        let block = assembler().assemble(&passages, 8, "q").unwrap();
        assert_eq!(block.passages.len(), 1);
        assert!(block.passages[0].truncated);
        assert_eq!(block.passages[0].chunk_id, Uuid::from_u128(1));
        assert_eq!(block.total_tokens, 8);
        assert_eq!(count_tokens(&block.text), 8);
    }

    #[test]
    fn test_budget_bound_holds_for_many_budgets() {
        let passages: Vec<_> = (1..=8).map(|n| passage(n, (n as usize * 3) % 11 + 1)).collect();
        let assembler = assembler();
        for budget in 4..80 {
            let block = assembler.assemble(&passages, budget, "q").unwrap();
            assert!(block.total_tokens <= budget, "budget {budget}");
            assert_eq!(count_tokens(&block.text), block.total_tokens);
            assert!(!block.is_empty());
        }
    }

    #[test]
    fn test_empty_input_gives_empty_block() {
        let block = assembler().assemble(&[], 50, "q").unwrap();
        assert!(block.is_empty());
        assert_eq!(block.budget, 50);
        assert_eq!(block.text, "");
    }

    #[test]
    fn test_budget_below_minimum_is_rejected() {
        let err = assembler().assemble(&[passage(1, 2)], 3, "q").unwrap_err();
        assert_eq!(err.minimum, 4);

        let long_query = "word ".repeat(30);
        assert!(assembler().assemble(&[], 20, &long_query).is_err());

        assert!(
            ContextAssembler::new(&ContextConfig {
                token_budget: 2,
                min_budget_tokens: 32,
                prompt_reserve_tokens: 0,
            })
            .is_err()
        );
    }
}
