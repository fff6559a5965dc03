use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    users (id) {
        id -> Uuid,
        name -> Text,
        email -> Text,
        image -> Nullable<Text>,
        active_profile -> Text,
        timezone -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    expert_profiles (user_id) {
        user_id -> Uuid,
        stripe_account_id -> Nullable<Text>,
        is_onboard_completed -> Bool,
        hourly_rate -> Nullable<Numeric>,
        updated_at -> Timestamptz,
    }
}

table! {
    bookings (id) {
        id -> Uuid,
        student_id -> Uuid,
        expert_id -> Uuid,
        date -> Timestamptz,
        expert_date_time -> Timestamp,
        student_date_time -> Timestamp,
        session_duration -> Integer,
        session_details -> Text,
        status -> Text,
        meeting_link -> Nullable<Text>,
        meeting_id -> Nullable<Text>,
        refund_reason -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    transactions (id) {
        id -> Uuid,
        booking_id -> Uuid,
        amount -> Numeric,
        currency -> Text,
        status -> Text,
        provider -> Text,
        provider_id -> Nullable<Text>,
        payout_id -> Nullable<Text>,
        refund_date -> Nullable<Timestamptz>,
        refund_reason -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    notifications (id) {
        id -> Uuid,
        kind -> Text,
        sender_id -> Nullable<Uuid>,
        recipient_id -> Uuid,
        title -> Text,
        message -> Text,
        image -> Nullable<Text>,
        meta -> Jsonb,
        read_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

table! {
    conversations (id) {
        id -> Uuid,
        conversation_key -> Text,
        participant1_id -> Uuid,
        participant2_id -> Uuid,
        last_message_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

table! {
    messages (id) {
        id -> Uuid,
        conversation_id -> Uuid,
        sender_id -> Uuid,
        recipient_id -> Uuid,
        content -> Bytea,
        created_at -> Timestamptz,
        read_at -> Nullable<Timestamptz>,
    }
}

joinable!(expert_profiles -> users (user_id));
joinable!(transactions -> bookings (booking_id));
joinable!(messages -> conversations (conversation_id));

allow_tables_to_appear_in_same_query!(
    users,
    expert_profiles,
    bookings,
    transactions,
    notifications,
    conversations,
    messages,
);
