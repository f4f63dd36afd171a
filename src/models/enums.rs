use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Course {
    Starter => "starter",
    MainCourse => "main_course",
    Dessert => "dessert",
});

impl Course {
    /// Quota priority order: a recipe tagged with several courses lands in the first match.
    pub const ALL: [Course; 3] = [Course::Starter, Course::MainCourse, Course::Dessert];

    /// Derive the course bucket from a recipe's category tags.
    ///
    /// Tags are compared case-insensitively with spaces and dashes folded to
    /// underscores ("Main Course" == "main_course"). No match → main course.
    pub fn from_categories<S: AsRef<str>>(categories: &[S]) -> Course {
        let normalized: Vec<String> = categories
            .iter()
            .map(|c| c.as_ref().trim().to_lowercase().replace([' ', '-'], "_"))
            .collect();

        Self::ALL
            .into_iter()
            .find(|course| normalized.iter().any(|c| c == course.as_str()))
            .unwrap_or(Course::MainCourse)
    }
}

str_enum!(Diet {
    Vegetarian => "vegetarian",
    Vegan => "vegan",
    Pescatarian => "pescatarian",
    GlutenFree => "gluten_free",
    LactoseFree => "lactose_free",
    LowCarb => "low_carb",
    Halal => "halal",
    Kosher => "kosher",
});

impl Diet {
    /// Lenient parse for catalog payloads ("Gluten-free", "gluten free", "GLUTEN_FREE").
    pub fn parse_loose(raw: &str) -> Option<Diet> {
        raw.trim()
            .to_lowercase()
            .replace([' ', '-'], "_")
            .parse()
            .ok()
    }
}

str_enum!(BookStatus {
    Draft => "draft",
    Ready => "ready",
    Delivered => "delivered",
});
