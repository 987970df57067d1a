use crate::models::{
    ChatCompletionBody, ChatMessage, InterestRequest, Interests, ResponseFormat, DEFAULT_MOOD,
};

/// Number of titles the model is asked for
pub const RECOMMENDATION_COUNT: usize = 10;

const SYSTEM_INSTRUCTION: &str = "You are a movie and TV show recommendation assistant. \
Respond ONLY with the requested JSON format. Your entire reply must be a single JSON object.";

const RESPONSE_SHAPE: &str = r#"{
  "recommendations": [
    {
      "title": "Movie or TV Show Title",
      "year": YYYY,
      "reason": "A brief explanation of 1-2 sentences on why this title is recommended for me based on my interests."
    },
    {
      "title": "Another Title",
      "year": YYYY,
      "reason": "..."
    }
  ]
}"#;

/// Turns a validated interest request into a chat completion body
///
/// Pure: no I/O, same input always yields the same body.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    model: String,
}

impl PromptBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn build(&self, request: &InterestRequest) -> ChatCompletionBody {
        let mut messages = vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(user_prompt(request)),
        ];

        let seen = request.seen_titles();
        if !seen.is_empty() {
            messages.push(ChatMessage::system(exclusion_instruction(&seen)));
        }

        ChatCompletionBody {
            model: self.model.clone(),
            stream: true,
            response_format: ResponseFormat::json_object(),
            messages,
        }
    }
}

fn exclusion_instruction(seen: &[String]) -> String {
    format!(
        "The user has already seen these titles. DO NOT recommend any of them: {}",
        seen.join(", ")
    )
}

fn interest_section(interests: &Interests) -> String {
    match interests {
        Interests::Ratings(ratings) => format!(
            "My rated movies/shows (Title (Year) - Rating/10):\n{}",
            ratings
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Interests::Favorites(favorites) => format!(
            "Some of my favorite movies/shows are:\n{}",
            favorites
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        ),
        Interests::Genres(genres) => {
            format!("I enjoy the following genres:\n{}", genres.join(", "))
        }
    }
}

fn describe_mood(mood: &str) -> String {
    if mood.eq_ignore_ascii_case(DEFAULT_MOOD) {
        "flexible, surprise me!".to_string()
    } else {
        mood.replace('-', " ")
    }
}

fn user_prompt(request: &InterestRequest) -> String {
    format!(
        "Based on my interests below, please recommend {count} new titles that I haven't seen before.\n\
         \n\
         {interests}\n\
         \n\
         Scope the recommendations down to {scope}.\n\
         My current mood is: {mood}.\n\
         \n\
         Please respond ONLY in this exact JSON format and nothing else:\n\
         {shape}\n\
         \n\
         The \"recommendations\" array must contain exactly {count} entries, none of them titles listed above.",
        count = RECOMMENDATION_COUNT,
        interests = interest_section(request.interests()),
        scope = request.media_type().describe(),
        mood = describe_mood(request.mood()),
        shape = RESPONSE_SHAPE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FavoriteTitle, MediaType, RatedTitle, Role};

    fn builder() -> PromptBuilder {
        PromptBuilder::new("test-model")
    }

    #[test]
    fn test_genres_prompt_has_no_exclusion_message() {
        let request = InterestRequest::new(
            Interests::Genres(vec!["Comedy".to_string()]),
            "whatever",
            MediaType::Movie,
        )
        .unwrap();

        let body = builder().build(&request);

        assert_eq!(body.model, "test-model");
        assert!(body.stream);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, Role::System);
        assert!(!body.messages[0].content.contains("DO NOT recommend"));

        let user = &body.messages[1].content;
        assert!(user.contains("Comedy"));
        assert!(user.contains("exactly 10 entries"));
        assert!(user.contains("recommend 10 new titles"));
        assert!(user.contains("\"recommendations\""));
        assert!(user.contains("Scope the recommendations down to movies."));
        assert!(user.contains("flexible, surprise me!"));
    }

    #[test]
    fn test_ratings_prompt_excludes_rated_titles() {
        let request = InterestRequest::new(
            Interests::Ratings(vec![
                RatedTitle {
                    title: "Heat".to_string(),
                    year: Some(1995),
                    user_rating: 10,
                },
                RatedTitle {
                    title: "Ronin".to_string(),
                    year: Some(1998),
                    user_rating: 8,
                },
            ]),
            "need-a-laugh",
            MediaType::Both,
        )
        .unwrap();

        let body = builder().build(&request);

        assert_eq!(body.messages.len(), 3);
        let user = &body.messages[1].content;
        assert!(user.contains("Heat (1995) - 10/10, Ronin (1998) - 8/10"));
        assert!(user.contains("movies or TV shows"));
        assert!(user.contains("My current mood is: need a laugh."));

        let exclusion = &body.messages[2];
        assert_eq!(exclusion.role, Role::System);
        assert!(exclusion.content.contains("DO NOT recommend"));
        assert!(exclusion.content.contains("Heat (1995), Ronin (1998)"));
    }

    #[test]
    fn test_favorites_prompt_excludes_favorites() {
        let request = InterestRequest::new(
            Interests::Favorites(vec![FavoriteTitle {
                title: "Arrival".to_string(),
                year: Some(2016),
            }]),
            "Whatever",
            MediaType::Tv,
        )
        .unwrap();

        let body = builder().build(&request);

        assert!(body.messages[1].content.contains("Arrival (2016)"));
        assert!(body.messages[1].content.contains("TV shows"));
        assert!(body.messages[1].content.contains("flexible, surprise me!"));
        assert!(body.messages[2].content.contains("Arrival (2016)"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let request = InterestRequest::new(
            Interests::Genres(vec!["Horror".to_string(), "Drama".to_string()]),
            "dark",
            MediaType::Movie,
        )
        .unwrap();
        assert_eq!(builder().build(&request), builder().build(&request));
    }
}
