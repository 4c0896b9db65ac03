//! Hangman round state. The gateway owns one [`HangmanGame`] per accepted
//! invite and only ever sends the masked word to the guesser.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_INCORRECT_GUESSES: u8 = 7;
pub const MIN_WORD_LEN: usize = 3;
pub const MAX_WORD_LEN: usize = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HangmanError {
    #[error("word must be 3 to 30 letters without digits or symbols")]
    InvalidWord,
    #[error("a guess must be a single letter")]
    InvalidLetter,
    #[error("letter '{0}' was already guessed")]
    AlreadyGuessed(char),
    #[error("no word has been chosen yet")]
    NoWord,
    #[error("a word is already in play")]
    WordAlreadySet,
    #[error("the round is over")]
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    AwaitingWord,
    InProgress,
    Won,
    Lost,
}

impl GameStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

/// Lowercase a letter and strip French diacritics. Returns `None` for
/// anything that is not a letter once folded.
pub fn fold_letter(c: char) -> Option<char> {
    let lower = c.to_lowercase().next()?;
    let folded = match lower {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    };
    folded.is_ascii_lowercase().then_some(folded)
}

/// Fold every letter of `raw` and check the length bounds.
pub fn normalize_word(raw: &str) -> Result<String, HangmanError> {
    let word = raw
        .trim()
        .chars()
        .map(fold_letter)
        .collect::<Option<String>>()
        .ok_or(HangmanError::InvalidWord)?;

    if !(MIN_WORD_LEN..=MAX_WORD_LEN).contains(&word.len()) {
        return Err(HangmanError::InvalidWord);
    }
    Ok(word)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessOutcome {
    pub letter: char,
    pub correct: bool,
    pub masked: String,
    pub incorrect_guesses: u8,
    pub status: GameStatus,
}

#[derive(Debug, Default, Clone)]
pub struct HangmanGame {
    word: Option<String>,
    guessed: BTreeSet<char>,
    incorrect: u8,
}

impl HangmanGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_word(&mut self, raw: &str) -> Result<usize, HangmanError> {
        if self.word.is_some() {
            return Err(HangmanError::WordAlreadySet);
        }
        let word = normalize_word(raw)?;
        let len = word.len();
        self.word = Some(word);
        Ok(len)
    }

    pub fn guess(&mut self, raw: &str) -> Result<GuessOutcome, HangmanError> {
        let word = self.word.as_deref().ok_or(HangmanError::NoWord)?;
        if self.status().is_finished() {
            return Err(HangmanError::Finished);
        }

        let mut chars = raw.trim().chars();
        let letter = match (chars.next(), chars.next()) {
            (Some(c), None) => fold_letter(c).ok_or(HangmanError::InvalidLetter)?,
            _ => return Err(HangmanError::InvalidLetter),
        };

        if !self.guessed.insert(letter) {
            return Err(HangmanError::AlreadyGuessed(letter));
        }

        let correct = word.contains(letter);
        if !correct {
            self.incorrect += 1;
        }

        Ok(GuessOutcome {
            letter,
            correct,
            masked: self.masked(),
            incorrect_guesses: self.incorrect,
            status: self.status(),
        })
    }

    /// The word with unguessed letters replaced by `_`.
    pub fn masked(&self) -> String {
        match &self.word {
            Some(word) => word
                .chars()
                .map(|c| if self.guessed.contains(&c) { c } else { '_' })
                .collect(),
            None => String::new(),
        }
    }

    pub fn status(&self) -> GameStatus {
        let Some(word) = &self.word else {
            return GameStatus::AwaitingWord;
        };
        if word.chars().all(|c| self.guessed.contains(&c)) {
            GameStatus::Won
        } else if self.incorrect >= MAX_INCORRECT_GUESSES {
            GameStatus::Lost
        } else {
            GameStatus::InProgress
        }
    }

    pub fn incorrect_guesses(&self) -> u8 {
        self.incorrect
    }

    /// The word, once the round is over.
    pub fn revealed_word(&self) -> Option<&str> {
        if self.status().is_finished() {
            self.word.as_deref()
        } else {
            None
        }
    }

    /// Start a fresh round with the same players.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folding_removes_accents() {
        assert_eq!(fold_letter('É'), Some('e'));
        assert_eq!(fold_letter('ç'), Some('c'));
        assert_eq!(fold_letter('û'), Some('u'));
        assert_eq!(fold_letter('1'), None);
        assert_eq!(fold_letter('-'), None);
        assert_eq!(normalize_word(" Éléphant ").unwrap(), "elephant");
        assert_eq!(normalize_word("ab"), Err(HangmanError::InvalidWord));
        assert_eq!(normalize_word("porte-manteau"), Err(HangmanError::InvalidWord));
    }

    #[test]
    fn winning_round() {
        let mut game = HangmanGame::new();
        assert_eq!(game.status(), GameStatus::AwaitingWord);
        assert_eq!(game.guess("a"), Err(HangmanError::NoWord));

        assert_eq!(game.submit_word("Café").unwrap(), 4);
        assert_eq!(game.submit_word("autre"), Err(HangmanError::WordAlreadySet));
        assert_eq!(game.masked(), "____");

        let out = game.guess("É").unwrap();
        assert!(out.correct);
        assert_eq!(out.masked, "___e");
        assert_eq!(game.guess("e"), Err(HangmanError::AlreadyGuessed('e')));

        let out = game.guess("z").unwrap();
        assert!(!out.correct);
        assert_eq!(out.incorrect_guesses, 1);
        assert_eq!(game.revealed_word(), None);

        game.guess("c").unwrap();
        game.guess("a").unwrap();
        let out = game.guess("f").unwrap();
        assert_eq!(out.status, GameStatus::Won);
        assert_eq!(game.revealed_word(), Some("cafe"));
        assert_eq!(game.guess("q"), Err(HangmanError::Finished));
    }

    #[test]
    fn seven_misses_lose() {
        let mut game = HangmanGame::new();
        game.submit_word("chat").unwrap();
        for (i, letter) in ["b", "d", "e", "f", "g", "i", "j"].iter().enumerate() {
            let out = game.guess(letter).unwrap();
            assert_eq!(out.incorrect_guesses as usize, i + 1);
        }
        assert_eq!(game.status(), GameStatus::Lost);
        assert_eq!(game.revealed_word(), Some("chat"));

        game.reset();
        assert_eq!(game.status(), GameStatus::AwaitingWord);
        assert_eq!(game.incorrect_guesses(), 0);
    }

    #[test]
    fn guesses_must_be_single_letters() {
        let mut game = HangmanGame::new();
        game.submit_word("maison").unwrap();
        assert_eq!(game.guess("ab"), Err(HangmanError::InvalidLetter));
        assert_eq!(game.guess(""), Err(HangmanError::InvalidLetter));
        assert_eq!(game.guess("7"), Err(HangmanError::InvalidLetter));
    }
}
