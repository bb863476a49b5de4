use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use std::collections::{HashMap, HashSet};

use crate::models::{QuizQuestion, Word};

/// 远端题库：单字 id → 题目
pub type QuestionBank = HashMap<String, Vec<QuizQuestion>>;

const DISTRACTORS: usize = 3;

fn is_answerable(question: &QuizQuestion) -> bool {
    question.correct_answer_index < question.options.len()
}

// 题库里随机挑一题，补上单字的 id 和拼字
fn bank_question<R: Rng + ?Sized>(word: &Word, bank: &QuestionBank, rng: &mut R) -> Option<QuizQuestion> {
    let candidates: Vec<&QuizQuestion> = bank.get(&word.id)?.iter().filter(|q| is_answerable(q)).collect();
    let mut question = (*candidates.choose(rng)?).clone();
    question.word_id = word.id.clone();
    question.word_term = Some(word.term.clone());
    Some(question)
}

/// 题库没有题目时，用其他单字的中文意思当干扰选项出一题
pub fn meaning_question<R: Rng + ?Sized>(word: &Word, pool: &[Word], rng: &mut R) -> Option<QuizQuestion> {
    let answer = word.meaning.trim();
    if answer.is_empty() {
        return None;
    }
    let mut others: Vec<&str> = pool
        .iter()
        .filter(|w| w.id != word.id)
        .map(|w| w.meaning.trim())
        .filter(|m| !m.is_empty() && *m != answer)
        .collect();
    others.sort_unstable();
    others.dedup();

    let mut options: Vec<String> = others.choose_multiple(rng, DISTRACTORS).map(|m| m.to_string()).collect();
    if options.is_empty() {
        return None;
    }
    options.push(answer.to_string());
    options.shuffle(rng);
    let correct_answer_index = options.iter().position(|o| o == answer)?;

    Some(QuizQuestion {
        word_id: word.id.clone(),
        word_term: Some(word.term.clone()),
        question: format!("「{}」的中文意思是？", word.term),
        options,
        correct_answer_index,
        source: Some("单字表".to_string()),
        ..Default::default()
    })
}

/// 组一轮测验：每个单字一题，加上错题本里的单字题，按题目文字去重后打乱，最多 `limit` 题（0 表示不限）
pub fn build_quiz<R: Rng + ?Sized>(
    words: &[&Word],
    bank: &QuestionBank,
    pool: &[Word],
    extra: &[QuizQuestion],
    limit: usize,
    rng: &mut R,
) -> Vec<QuizQuestion> {
    let mut questions = Vec::new();
    for word in words {
        let question = match bank_question(word, bank, rng) {
            Some(question) => Some(question),
            None => meaning_question(word, pool, rng),
        };
        match question {
            Some(question) => questions.push(question),
            None => tracing::debug!(term = %word.term, "没有可用的题目"),
        }
    }
    // 文法题没有对应单字，不计入单字进度
    questions.extend(
        extra
            .iter()
            .filter(|q| q.grammar_tag.is_none() && !q.word_id.is_empty() && is_answerable(q))
            .cloned(),
    );

    let mut seen = HashSet::new();
    questions.retain(|q| seen.insert(q.question.clone()));
    questions.shuffle(rng);
    if limit > 0 {
        questions.truncate(limit);
    }
    questions
}

/// 选项编号：A 到 Z，之后改用数字
pub fn option_label(index: usize) -> String {
    u32::try_from(index)
        .ok()
        .filter(|&i| i < 26)
        .and_then(|i| char::from_u32('A' as u32 + i))
        .map(String::from)
        .unwrap_or_else(|| (index + 1).to_string())
}

/// 解析作答：字母（不分大小写）或从 1 开始的数字
pub fn parse_choice(input: &str, option_count: usize) -> Option<usize> {
    let input = input.trim();
    let index = match input.parse::<usize>() {
        Ok(number) => number.checked_sub(1)?,
        Err(_) => {
            let mut chars = input.chars();
            let letter = chars.next()?.to_ascii_uppercase();
            if chars.next().is_some() || !letter.is_ascii_uppercase() {
                return None;
            }
            (letter as usize) - ('A' as usize)
        }
    };
    (index < option_count).then_some(index)
}
