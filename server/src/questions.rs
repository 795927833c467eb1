use log::info;
use shared::{CategoryInfo, CustomCategory, QuestionSummary};

use crate::store::{QuestionStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: u32,
    pub category_id: u32,
    pub text: String,
    pub answer: String,
    pub price: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub questions: Vec<Question>,
}

/// Immutable snapshot of categories and questions for one round. Loaded from
/// the question store at startup, or converted from a host-supplied custom
/// pack; read-only afterwards, so it needs no locking.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    categories: Vec<Category>,
}

impl QuestionBank {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    pub async fn load(store: &dyn QuestionStore) -> Result<Self, StoreError> {
        let categories = store.load_categories().await?;
        let bank = Self::new(categories);
        info!(
            "Loaded {} categories and {} questions",
            bank.categories.len(),
            bank.question_count()
        );
        Ok(bank)
    }

    /// Converts a host-supplied pack into a bank, assigning sequential ids:
    /// categories from 1, questions from 1 in category-major order. Returns
    /// `None` on a malformed pack so the caller can fall back to the store
    /// bank.
    pub fn from_custom(pack: &[CustomCategory]) -> Option<Self> {
        if pack.is_empty() {
            return None;
        }

        let mut categories = Vec::with_capacity(pack.len());
        let mut next_question_id = 1u32;

        for (index, custom) in pack.iter().enumerate() {
            let category_id = index as u32 + 1;
            if custom.name.trim().is_empty() || custom.questions.is_empty() {
                return None;
            }

            let mut questions = Vec::with_capacity(custom.questions.len());
            for q in &custom.questions {
                if q.text.trim().is_empty() || q.answer.trim().is_empty() || q.price <= 0 {
                    return None;
                }
                questions.push(Question {
                    id: next_question_id,
                    category_id,
                    text: q.text.clone(),
                    answer: q.answer.clone(),
                    price: q.price,
                });
                next_question_id += 1;
            }

            categories.push(Category {
                id: category_id,
                name: custom.name.clone(),
                questions,
            });
        }

        Some(Self::new(categories))
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, id: u32) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn question(&self, id: u32) -> Option<&Question> {
        self.categories
            .iter()
            .flat_map(|c| c.questions.iter())
            .find(|q| q.id == id)
    }

    pub fn question_count(&self) -> usize {
        self.categories.iter().map(|c| c.questions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.question_count() == 0
    }

    /// Client-facing board: ids and prices only, answers stay server-side.
    pub fn board(&self) -> Vec<CategoryInfo> {
        self.categories
            .iter()
            .map(|c| CategoryInfo {
                id: c.id,
                name: c.name.clone(),
                questions: c
                    .questions
                    .iter()
                    .map(|q| QuestionSummary {
                        id: q.id,
                        price: q.price,
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::CustomQuestion;

    fn custom_pack() -> Vec<CustomCategory> {
        vec![
            CustomCategory {
                name: "Movies".to_string(),
                questions: vec![
                    CustomQuestion {
                        text: "Who directed Alien?".to_string(),
                        answer: "Ridley Scott".to_string(),
                        price: 100,
                    },
                    CustomQuestion {
                        text: "Who played Neo?".to_string(),
                        answer: "Keanu Reeves".to_string(),
                        price: 200,
                    },
                ],
            },
            CustomCategory {
                name: "Music".to_string(),
                questions: vec![CustomQuestion {
                    text: "Who wrote the Ninth Symphony?".to_string(),
                    answer: "Beethoven".to_string(),
                    price: 300,
                }],
            },
        ]
    }

    #[test]
    fn custom_pack_gets_sequential_ids() {
        let bank = QuestionBank::from_custom(&custom_pack()).unwrap();

        let categories = bank.categories();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].id, 1);
        assert_eq!(categories[1].id, 2);

        // Question ids run category-major across the whole pack
        assert_eq!(categories[0].questions[0].id, 1);
        assert_eq!(categories[0].questions[1].id, 2);
        assert_eq!(categories[1].questions[0].id, 3);
        assert_eq!(categories[1].questions[0].category_id, 2);
    }

    #[test]
    fn empty_pack_is_rejected() {
        assert!(QuestionBank::from_custom(&[]).is_none());
    }

    #[test]
    fn category_without_questions_is_rejected() {
        let mut pack = custom_pack();
        pack[1].questions.clear();
        assert!(QuestionBank::from_custom(&pack).is_none());
    }

    #[test]
    fn blank_answer_is_rejected() {
        let mut pack = custom_pack();
        pack[0].questions[0].answer = "   ".to_string();
        assert!(QuestionBank::from_custom(&pack).is_none());
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let mut pack = custom_pack();
        pack[0].questions[1].price = 0;
        assert!(QuestionBank::from_custom(&pack).is_none());
    }

    #[test]
    fn lookups_by_id() {
        let bank = QuestionBank::from_custom(&custom_pack()).unwrap();

        assert_eq!(bank.category(2).unwrap().name, "Music");
        assert!(bank.category(9).is_none());

        let q = bank.question(3).unwrap();
        assert_eq!(q.answer, "Beethoven");
        assert!(bank.question(42).is_none());

        assert_eq!(bank.question_count(), 3);
        assert!(!bank.is_empty());
        assert!(QuestionBank::default().is_empty());
    }

    #[test]
    fn board_hides_answers() {
        let bank = QuestionBank::from_custom(&custom_pack()).unwrap();
        let board = bank.board();

        assert_eq!(board.len(), 2);
        assert_eq!(board[0].name, "Movies");
        assert_eq!(board[0].questions.len(), 2);
        assert_eq!(board[0].questions[1].price, 200);
        // CategoryInfo carries no answer field at the type level; the ids
        // must still line up with the internal bank.
        assert_eq!(board[1].questions[0].id, 3);
    }
}
