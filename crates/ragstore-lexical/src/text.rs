//! Word splitting and term-similarity helpers for the lexical engines.

use std::cmp::min;
use unicode_segmentation::UnicodeSegmentation;

pub const STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

pub fn is_stop_word(word: &str) -> bool {
	STOP_WORDS.contains(&word)
}

/// Lowercased Unicode words, optionally without stop words.
pub fn tokenize(text: &str, drop_stop_words: bool) -> Vec<String> {
	text.unicode_words()
		.map(str::to_lowercase)
		.filter(|w| !(drop_stop_words && is_stop_word(w)))
		.collect()
}

/// Edit budget for a query word, by length.
pub fn max_edits(word: &str) -> usize {
	match word.chars().count() {
		0..=3 => 0,
		4..=5 => 1,
		6..=9 => 2,
		_ => 3,
	}
}

/// Levenshtein distance, or `None` once it exceeds `limit`.
pub fn levenshtein_within(a: &str, b: &str, limit: usize) -> Option<usize> {
	let a: Vec<char> = a.chars().collect();
	let b: Vec<char> = b.chars().collect();
	if a.len().abs_diff(b.len()) > limit {
		return None;
	}
	if a.is_empty() || b.is_empty() {
		let d = a.len().max(b.len());
		return (d <= limit).then_some(d);
	}
	let mut prev: Vec<usize> = (0..=b.len()).collect();
	let mut cur = vec![0; b.len() + 1];
	for i in 1..=a.len() {
		cur[0] = i;
		let mut row_min = cur[0];
		for j in 1..=b.len() {
			let cost = usize::from(a[i - 1] != b[j - 1]);
			cur[j] = min(min(prev[j] + 1, cur[j - 1] + 1), prev[j - 1] + cost);
			row_min = row_min.min(cur[j]);
		}
		if row_min > limit {
			return None;
		}
		std::mem::swap(&mut prev, &mut cur);
	}
	let d = prev[b.len()];
	(d <= limit).then_some(d)
}

/// American Soundex code (letter + three digits); `None` for words without ASCII letters.
pub fn soundex(word: &str) -> Option<String> {
	fn digit(c: char) -> Option<char> {
		match c {
			'b' | 'f' | 'p' | 'v' => Some('1'),
			'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
			'd' | 't' => Some('3'),
			'l' => Some('4'),
			'm' | 'n' => Some('5'),
			'r' => Some('6'),
			_ => None,
		}
	}

	let mut letters = word.chars().filter(char::is_ascii_alphabetic).map(|c| c.to_ascii_lowercase());
	let first = letters.next()?;
	let mut code = String::with_capacity(4);
	code.push(first.to_ascii_uppercase());
	let mut last = digit(first);
	for c in letters {
		let d = digit(c);
		if let Some(d) = d {
			if last != Some(d) {
				code.push(d);
				if code.len() == 4 {
					break;
				}
			}
		}
		// h and w do not separate letters with the same code
		if c != 'h' && c != 'w' {
			last = d;
		}
	}
	while code.len() < 4 {
		code.push('0');
	}
	Some(code)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tokenize_lowercases_and_drops_stop_words() {
		assert_eq!(tokenize("The Cats, and the DOGS!", true), vec!["cats", "dogs"]);
		assert_eq!(tokenize("The cat", false), vec!["the", "cat"]);
	}

	#[test]
	fn levenshtein_bounds() {
		assert_eq!(levenshtein_within("kitten", "sitting", 3), Some(3));
		assert_eq!(levenshtein_within("kitten", "sitting", 2), None);
		assert_eq!(levenshtein_within("cat", "cat", 0), Some(0));
	}

	#[test]
	fn soundex_codes() {
		assert_eq!(soundex("Robert").as_deref(), Some("R163"));
		assert_eq!(soundex("Rupert").as_deref(), Some("R163"));
		assert_eq!(soundex("Ashcraft").as_deref(), Some("A261"));
		assert_eq!(soundex("Tymczak").as_deref(), Some("T522"));
		assert_eq!(soundex("123"), None);
	}
}
