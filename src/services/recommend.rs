//! Content-based book recommender.
//!
//! Classic TF-IDF over title + category + author + description, cosine
//! similarity against one target book. Stateless: vectors are rebuilt from
//! the catalog on every request, which is fine at school-library scale.

use once_cell::sync::Lazy;
use sea_orm::*;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

use crate::error::{AppError, AppResult};
use crate::models::book::{self, Entity as Book};
use crate::models::category::Entity as Category;

const SIMILARITY_THRESHOLD: f64 = 0.3;
const MAX_RECOMMENDATIONS: usize = 10;
/// Tokens shorter than this carry no signal and are dropped.
const MIN_TOKEN_CHARS: usize = 3;

static STOPWORDS: Lazy<HashSet<String>> = Lazy::new(|| {
    stop_words::get(stop_words::LANGUAGE::English)
        .iter()
        .map(|s| s.to_string())
        .collect()
});

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS && !STOPWORDS.contains(*t))
        .map(|t| t.to_string())
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<String, f64> {
    let mut tf: HashMap<String, f64> = HashMap::new();
    for t in tokens {
        *tf.entry(t.clone()).or_insert(0.0) += 1.0;
    }
    let n = tokens.len() as f64;
    if n > 0.0 {
        for v in tf.values_mut() {
            *v /= n;
        }
    }
    tf
}

/// Smoothed idf: `ln(N / (1 + df)) + 1`, so a term in every document still
/// contributes a little instead of zeroing out short corpora.
fn inverse_document_frequencies(documents: &[Vec<String>]) -> HashMap<String, f64> {
    let n = documents.len() as f64;
    let mut df: HashMap<String, f64> = HashMap::new();
    for doc in documents {
        let unique: HashSet<&String> = doc.iter().collect();
        for t in unique {
            *df.entry(t.clone()).or_insert(0.0) += 1.0;
        }
    }
    df.into_iter()
        .map(|(t, d)| (t, (n / (1.0 + d)).ln() + 1.0))
        .collect()
}

fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(t, va)| b.get(t).map(|vb| va * vb))
        .sum();
    let norm = |m: &HashMap<String, f64>| m.values().map(|v| v * v).sum::<f64>().sqrt();
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Score every other document against the target. Returns `(id, score)`
/// pairs above the similarity threshold, best first, at most
/// [`MAX_RECOMMENDATIONS`].
fn rank_documents(documents: &[(i32, String)], target_id: i32) -> Vec<(i32, f64)> {
    let tokenized: Vec<Vec<String>> = documents.iter().map(|(_, text)| tokenize(text)).collect();
    let idf = inverse_document_frequencies(&tokenized);

    let weigh = |tokens: &[String]| -> HashMap<String, f64> {
        term_frequencies(tokens)
            .into_iter()
            .map(|(t, tf)| {
                let w = tf * idf.get(&t).copied().unwrap_or(0.0);
                (t, w)
            })
            .collect()
    };

    let target_index = match documents.iter().position(|(id, _)| *id == target_id) {
        Some(i) => i,
        None => return Vec::new(),
    };
    let target_vector = weigh(&tokenized[target_index]);

    let mut scored: Vec<(i32, f64)> = documents
        .iter()
        .zip(tokenized.iter())
        .filter(|((id, _), _)| *id != target_id)
        .map(|((id, _), tokens)| (*id, cosine_similarity(&target_vector, &weigh(tokens))))
        .filter(|(_, score)| *score > SIMILARITY_THRESHOLD)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(MAX_RECOMMENDATIONS);
    scored
}

/// Books similar to `book_id`, with their similarity score attached.
pub async fn recommend_for(db: &DatabaseConnection, book_id: i32) -> AppResult<Vec<Value>> {
    let books = Book::find().find_also_related(Category).all(db).await?;

    if !books.iter().any(|(b, _)| b.id == book_id) {
        return Err(AppError::NotFound("book not found".to_string()));
    }

    let documents: Vec<(i32, String)> = books
        .iter()
        .map(|(b, cat)| {
            let mut parts = vec![b.title.clone(), b.author.clone()];
            if let Some(cat) = cat {
                parts.push(cat.name.clone());
            }
            if let Some(description) = &b.description {
                parts.push(description.clone());
            }
            (b.id, parts.join(" "))
        })
        .collect();

    let by_id: HashMap<i32, &(book::Model, Option<crate::models::category::Model>)> =
        books.iter().map(|pair| (pair.0.id, pair)).collect();

    let rows = rank_documents(&documents, book_id)
        .into_iter()
        .filter_map(|(id, score)| {
            by_id.get(&id).map(|(b, cat)| {
                json!({
                    "id": b.id,
                    "title": b.title,
                    "author": b.author,
                    "isbn": b.isbn,
                    "cover": b.cover,
                    "category_id": b.category_id,
                    "category_name": cat.as_ref().map(|c| c.name.clone()),
                    "score": score,
                })
            })
        })
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_drops_stopwords_and_short_tokens() {
        let tokens = tokenize("The Art of War: an introduction to strategy!");
        assert!(tokens.contains(&"art".to_string()));
        assert!(tokens.contains(&"war".to_string()));
        assert!(tokens.contains(&"strategy".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"of".to_string()));
        assert!(!tokens.contains(&"an".to_string()));
    }

    #[test]
    fn similar_books_outrank_unrelated_ones() {
        let documents = vec![
            (1, "Rust programming systems language memory safety".to_string()),
            (2, "Programming Rust fast safe systems development".to_string()),
            (3, "French cooking pastry dessert recipes kitchen".to_string()),
        ];
        let ranked = rank_documents(&documents, 1);
        assert_eq!(ranked.first().map(|(id, _)| *id), Some(2));
        assert!(!ranked.iter().any(|(id, _)| *id == 3));
    }

    #[test]
    fn unrelated_corpus_yields_nothing() {
        let documents = vec![
            (1, "astrophysics galaxies cosmology".to_string()),
            (2, "gardening tomatoes compost".to_string()),
        ];
        assert!(rank_documents(&documents, 1).is_empty());
    }

    #[test]
    fn identical_documents_score_near_one() {
        let documents = vec![
            (1, "database indexing btree storage".to_string()),
            (2, "database indexing btree storage".to_string()),
            (3, "medieval poetry anthology".to_string()),
        ];
        let ranked = rank_documents(&documents, 1);
        let top = ranked.first().expect("one hit");
        assert_eq!(top.0, 2);
        assert!(top.1 > 0.99);
    }
}
